//! MCP (Model Context Protocol) Server Framework
//!
//! This module provides a complete MCP server core following the JSON-RPC
//! 2.0 specification and MCP protocol version 2025-06-18: session lifecycle
//! and dispatch, the notification manager, tool execution contexts, and the
//! stdio/HTTP/SSE transport adapters.

pub mod context;
pub mod errors;
pub mod event_store;
pub mod notifications;
pub mod protocol;
pub mod requests;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;
pub mod validation;

#[cfg(test)]
mod tests;

pub use context::{AuthProvider, EnvAuthProvider, EnvSecretResolver, ProgressScope, SecretResolver, ToolCancelled, ToolContext};
pub use errors::{McpError, McpResult};
pub use event_store::{EventRecord, EventStore, InMemoryEventStore, Replay};
pub use notifications::{NotificationEnvelope, NotificationManager};
pub use protocol::*;
pub use requests::RequestManager;
pub use server::{
    CompletionProvider, EmptyCompletionProvider, EmptyPromptProvider, EmptyResourceProvider,
    McpServer, Middleware, PromptProvider, RequestContext, ResourceProvider, ServerOptions,
};
pub use session::{ChannelSink, DiscardSink, MessageSink, Session, SessionRegistry, SessionState};
pub use tools::{RegisteredTool, ToolHandler, ToolOutput, ToolRegistry};
pub use validation::McpValidator;
