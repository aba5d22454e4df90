//! Server configuration
//!
//! Settings are resolved from defaults, an optional TOML file, and `MCP_*`
//! environment variable overrides, in that order.

pub mod settings;

pub use settings::{ConfigError, ServerSettings};
