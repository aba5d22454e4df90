//! Transport Adapters
//!
//! Three ways onto the wire: NDJSON over stdio, single-shot HTTP, and SSE
//! with resumability. Transports own framing, headers, and session ids;
//! message semantics live in the dispatcher.

pub mod http;
pub mod sse;
pub mod stdio;

pub use http::serve_http;
pub use sse::serve_sse;
pub use stdio::serve_stdio;
