//! MCP Error Handling
//!
//! This module provides error classification for the three failure tiers the
//! server distinguishes: protocol errors, call-level errors, and
//! infrastructure errors, along with JSON-RPC response generation.

use crate::mcp::protocol::*;
use thiserror::Error;
use tracing::error;

/// MCP-specific errors that can occur during server operation
#[derive(Error, Debug, Clone)]
pub enum McpError {
    #[error("Unsupported protocol version: {version}")]
    UnsupportedProtocolVersion {
        version: String,
        supported: Vec<String>,
    },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for tool {tool}: {message}")]
    InvalidToolArguments { tool: String, message: String },

    #[error("Tool {tool} requires secret {name} which is not available")]
    MissingSecret { tool: String, name: String },

    #[error("Tool {tool} requires authorization but no bearer token is available")]
    MissingAuth { tool: String },

    #[error("Client does not support {capability}")]
    CapabilityNotSupported { capability: String },

    #[error("Unknown cursor")]
    InvalidCursor,

    #[error("not initialized")]
    NotInitialized,

    #[error("initialize already in flight")]
    DuplicateInitialize,

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("JSON-RPC parse error: {message}")]
    ParseError { message: String },

    #[error("session closed")]
    SessionClosed,

    #[error("timeout expired")]
    Timeout,

    #[error("client returned error {code}: {message}")]
    ClientResponse { code: i32, message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl McpError {
    /// Convert to the JSON-RPC error object for this failure
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::UnsupportedProtocolVersion { version, supported } => JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unsupported protocol version: {}", version),
                Some(serde_json::json!({ "supported": supported })),
            ),
            Self::UnknownTool { name } => JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", name),
                None,
            ),
            Self::InvalidToolArguments { tool, message } => JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Invalid arguments for tool '{}': {}", tool, message),
                None,
            ),
            Self::MissingSecret { tool, name } => JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Tool '{}' requires secret '{}'", tool, name),
                None,
            ),
            Self::MissingAuth { tool } => JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Tool '{}' requires authorization", tool),
                None,
            ),
            Self::CapabilityNotSupported { capability } => JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Client does not support {}", capability),
                None,
            ),
            Self::InvalidCursor => {
                JsonRpcError::new(error_codes::INVALID_PARAMS, "Unknown cursor".to_string(), None)
            }
            Self::NotInitialized => JsonRpcError::not_initialized(),
            Self::DuplicateInitialize => JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                "initialize already in flight".to_string(),
                None,
            ),
            Self::InvalidRequest { message } => {
                JsonRpcError::new(error_codes::INVALID_REQUEST, message.clone(), None)
            }
            Self::MethodNotFound { method } => JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
                None,
            ),
            Self::InvalidParams { message } => {
                JsonRpcError::new(error_codes::INVALID_PARAMS, message.clone(), None)
            }
            Self::ParseError { message } => {
                JsonRpcError::new(error_codes::PARSE_ERROR, message.clone(), None)
            }
            Self::SessionClosed => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                "session closed".to_string(),
                None,
            ),
            Self::Timeout => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                "timeout expired".to_string(),
                None,
            ),
            Self::ClientResponse { code, message } => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                format!("client returned error {}: {}", code, message),
                None,
            ),
            Self::Internal { message } => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                "Internal error".to_string(),
                Some(serde_json::json!({ "detail": message })),
            ),
        }
    }

    /// Create an error response message, optionally redacting `error.data`
    pub fn to_error_response(&self, id: Option<RequestId>, mask_details: bool) -> JsonRpcMessage {
        let mut error = self.to_jsonrpc_error();
        if mask_details {
            error.data = None;
        }
        JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(error, id))
    }

    /// Log the error with appropriate framing
    #[inline]
    pub fn log(&self) {
        match self {
            Self::ParseError { .. }
            | Self::InvalidRequest { .. }
            | Self::InvalidParams { .. }
            | Self::InvalidCursor => {
                error!("Client error: {}", self);
            }
            Self::UnknownTool { .. } | Self::MethodNotFound { .. } => {
                error!("Not found error: {}", self);
            }
            Self::Internal { .. } => {
                error!("Server error: {}", self);
            }
            _ => {
                error!("MCP error: {}", self);
            }
        }
    }
}

/// Result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

impl From<anyhow::Error> for McpError {
    #[inline]
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<McpError>() {
            Ok(mcp) => mcp,
            Err(other) => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for McpError {
    #[inline]
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidParams {
            message: error.to_string(),
        }
    }
}
