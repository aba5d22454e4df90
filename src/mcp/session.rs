//! MCP Session Management
//!
//! One session per transport connection. The session owns its lifecycle
//! state, negotiated capabilities, minimum log level, progress-token table,
//! and the request manager for server-initiated requests. External
//! components always go through the session handle; there is no global
//! lookup of per-session state.

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use crate::mcp::requests::RequestManager;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Initializing,
    Ready,
    Closed,
}

/// Write half of a session connection.
///
/// Implementations serialize writes; a failed send means the connection is
/// gone and the caller must close the session.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: Value) -> Result<()>;
}

/// Sink backed by an mpsc channel drained by a transport writer task
pub struct ChannelSink {
    tx: mpsc::Sender<Value>,
}

impl ChannelSink {
    #[inline]
    pub fn new(tx: mpsc::Sender<Value>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&self, message: Value) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| anyhow::anyhow!("write channel closed"))
    }
}

/// Sink for single-shot transports that have no server-to-client stream.
///
/// Notifications fanned out to such a session are silently discarded.
pub struct DiscardSink;

#[async_trait]
impl MessageSink for DiscardSink {
    async fn send(&self, _message: Value) -> Result<()> {
        Ok(())
    }
}

struct SessionShared {
    state: SessionState,
    protocol_version: Option<String>,
    client_capabilities: ClientCapabilities,
    server_capabilities: ServerCapabilities,
    min_log_level: LogLevel,
    active_progress_tokens: HashSet<ProgressToken>,
    cancelled_requests: HashSet<RequestId>,
}

/// Per-connection session
pub struct Session {
    id: String,
    sink: Arc<dyn MessageSink>,
    requests: Arc<RequestManager>,
    shared: RwLock<SessionShared>,
}

impl Session {
    /// Create a new session in the Pending state
    pub fn new(
        id: impl Into<String>,
        sink: Arc<dyn MessageSink>,
        min_log_level: LogLevel,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let id = id.into();
        Arc::new(Self {
            id,
            sink: Arc::clone(&sink),
            requests: Arc::new(RequestManager::new(sink, request_timeout)),
            shared: RwLock::new(SessionShared {
                state: SessionState::Pending,
                protocol_version: None,
                client_capabilities: ClientCapabilities::default(),
                server_capabilities: ServerCapabilities::default(),
                min_log_level,
                active_progress_tokens: HashSet::new(),
                cancelled_requests: HashSet::new(),
            }),
        })
    }

    /// Session identifier; echoed as `mcp-session-id` on HTTP transports
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request manager for server-initiated requests on this connection
    #[inline]
    pub fn requests(&self) -> &Arc<RequestManager> {
        &self.requests
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        self.shared.read().await.state
    }

    /// Begin the initialize handshake.
    ///
    /// A session may hold at most one in-flight initialize; a repeat attempt
    /// while Initializing fails, as does initialize on a Ready session.
    pub async fn begin_initialize(&self) -> McpResult<()> {
        let mut shared = self.shared.write().await;
        match shared.state {
            SessionState::Pending => {
                shared.state = SessionState::Initializing;
                Ok(())
            }
            SessionState::Initializing => Err(McpError::DuplicateInitialize),
            SessionState::Ready => Err(McpError::InvalidRequest {
                message: "already initialized".to_string(),
            }),
            SessionState::Closed => Err(McpError::SessionClosed),
        }
    }

    /// Roll an Initializing session back to Pending after a failed handshake
    pub async fn abort_initialize(&self) {
        let mut shared = self.shared.write().await;
        if shared.state == SessionState::Initializing {
            shared.state = SessionState::Pending;
        }
    }

    /// Record the negotiated protocol version and capability maps
    pub async fn store_negotiation(
        &self,
        protocol_version: String,
        client_capabilities: ClientCapabilities,
        server_capabilities: ServerCapabilities,
    ) {
        let mut shared = self.shared.write().await;
        shared.protocol_version = Some(protocol_version);
        shared.client_capabilities = client_capabilities;
        shared.server_capabilities = server_capabilities;
    }

    /// Transition Initializing -> Ready on `notifications/initialized`.
    ///
    /// Returns false when the notification arrived in any other state.
    pub async fn mark_initialized(&self) -> bool {
        let mut shared = self.shared.write().await;
        if shared.state == SessionState::Initializing {
            shared.state = SessionState::Ready;
            true
        } else {
            warn!(
                session = %self.id,
                "notifications/initialized received outside the handshake"
            );
            false
        }
    }

    /// Close the session: fail pending server-initiated requests and drop state
    pub async fn close(&self) {
        {
            let mut shared = self.shared.write().await;
            if shared.state == SessionState::Closed {
                return;
            }
            shared.state = SessionState::Closed;
            shared.active_progress_tokens.clear();
        }
        self.requests.fail_all(McpError::SessionClosed).await;
        debug!(session = %self.id, "session closed");
    }

    /// Negotiated protocol version, if the handshake completed
    pub async fn protocol_version(&self) -> Option<String> {
        self.shared.read().await.protocol_version.clone()
    }

    /// Snapshot of the client's capability map
    pub async fn client_capabilities(&self) -> ClientCapabilities {
        self.shared.read().await.client_capabilities.clone()
    }

    /// Whether the client advertised sampling support
    pub async fn client_supports_sampling(&self) -> bool {
        self.shared.read().await.client_capabilities.sampling.is_some()
    }

    /// Whether the client advertised roots support
    pub async fn client_supports_roots(&self) -> bool {
        self.shared.read().await.client_capabilities.roots.is_some()
    }

    /// Whether the client advertised elicitation support
    pub async fn client_supports_elicitation(&self) -> bool {
        self.shared
            .read()
            .await
            .client_capabilities
            .elicitation
            .is_some()
    }

    /// Whether the client advertised completions support
    pub async fn client_supports_completions(&self) -> bool {
        self.shared
            .read()
            .await
            .client_capabilities
            .completions
            .is_some()
    }

    /// Whether the negotiated capabilities admit a notification method.
    ///
    /// An absent notifications map admits everything; an explicit `false`
    /// entry opts the method out.
    pub async fn admits_notification(&self, method: &str) -> bool {
        let shared = self.shared.read().await;
        match &shared.client_capabilities.notifications {
            Some(map) => map.get(method).copied().unwrap_or(true),
            None => true,
        }
    }

    /// Minimum log level for `notifications/message` delivery
    pub async fn min_log_level(&self) -> LogLevel {
        self.shared.read().await.min_log_level
    }

    /// Set the minimum log level (from `logging/setLevel`)
    pub async fn set_min_log_level(&self, level: LogLevel) {
        self.shared.write().await.min_log_level = level;
    }

    /// Register a progress token for an in-flight request
    pub async fn register_progress_token(&self, token: ProgressToken) {
        self.shared
            .write()
            .await
            .active_progress_tokens
            .insert(token);
    }

    /// Release a progress token once the originating request completes
    pub async fn release_progress_token(&self, token: &ProgressToken) {
        self.shared
            .write()
            .await
            .active_progress_tokens
            .remove(token);
    }

    /// Whether a progress token is currently active on this session
    pub async fn has_progress_token(&self, token: &ProgressToken) -> bool {
        self.shared
            .read()
            .await
            .active_progress_tokens
            .contains(token)
    }

    /// Mark a request id as cancelled (best effort)
    pub async fn mark_cancelled(&self, id: RequestId) {
        self.shared.write().await.cancelled_requests.insert(id);
    }

    /// Whether the client cancelled the given request id
    pub async fn is_cancelled(&self, id: &RequestId) -> bool {
        self.shared.read().await.cancelled_requests.contains(id)
    }

    /// Drop the cancellation mark once the request is finished
    pub async fn clear_cancelled(&self, id: &RequestId) {
        self.shared.write().await.cancelled_requests.remove(id);
    }

    /// Write a JSON-RPC message to this session's connection
    pub async fn send(&self, message: &JsonRpcMessage) -> Result<()> {
        let value = serde_json::to_value(message)?;
        self.sink.send(value).await
    }

    /// Write a raw JSON value to this session's connection
    pub async fn send_raw(&self, message: Value) -> Result<()> {
        self.sink.send(message).await
    }
}

/// Process-wide registry of active sessions
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its id
    pub async fn insert(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .await
            .insert(session.id().to_string(), session);
    }

    /// Look up a session by id
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session, closing it first
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.write().await.remove(id);
        if let Some(ref s) = session {
            s.close().await;
        }
        session
    }

    /// Snapshot of all registered sessions
    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
