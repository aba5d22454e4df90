//! Tool Execution Context
//!
//! The per-call object handed to a tool. Exposes logging and progress
//! facets, declared secrets and metadata, the bearer token for
//! auth-requiring tools, and the client API for server-initiated requests
//! (sampling, roots, elicitation, completion).

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::notifications::NotificationManager;
use crate::mcp::protocol::*;
use crate::mcp::session::Session;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Marker error a tool returns after observing cooperative cancellation.
///
/// The executor suppresses the JSON-RPC response for calls that end this
/// way; the client has already abandoned the request id.
#[derive(Debug, Clone, Copy)]
pub struct ToolCancelled;

impl fmt::Display for ToolCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled")
    }
}

impl std::error::Error for ToolCancelled {}

/// Resolves named secrets and metadata for tool calls
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn secret(&self, name: &str) -> Option<String>;
    async fn metadata(&self, key: &str) -> Option<String>;
}

/// Default resolver backed by process environment variables.
///
/// Secrets are read verbatim by name; metadata keys are read under the
/// `MCP_META_` prefix, uppercased.
pub struct EnvSecretResolver;

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    async fn metadata(&self, key: &str) -> Option<String> {
        std::env::var(format!("MCP_META_{}", key.to_uppercase())).ok()
    }
}

/// Supplies bearer tokens for auth-requiring tools
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn bearer_token(&self, session_id: &str) -> Option<String>;
}

/// Default provider reading `MCP_BEARER_TOKEN` from the environment
pub struct EnvAuthProvider;

#[async_trait]
impl AuthProvider for EnvAuthProvider {
    async fn bearer_token(&self, _session_id: &str) -> Option<String> {
        std::env::var("MCP_BEARER_TOKEN").ok().filter(|t| !t.is_empty())
    }
}

struct ProgressState {
    token: Option<ProgressToken>,
    total: Option<f64>,
    current: Mutex<f64>,
    finished: Mutex<bool>,
}

/// Scoped progress tracker bound to the originating request's token.
///
/// A no-op when the client supplied no progress token.
pub struct ProgressScope {
    state: Arc<ProgressState>,
    notifications: Arc<NotificationManager>,
    session_id: String,
}

impl ProgressScope {
    /// Report an absolute progress value
    pub async fn update(&self, current: f64, message: Option<&str>) {
        let Some(token) = self.state.token.clone() else {
            return;
        };
        *self.state.current.lock().await = current;
        self.notifications
            .notify_progress(
                &self.session_id,
                ProgressParams {
                    progress_token: token,
                    progress: current,
                    total: self.state.total,
                    message: message.map(str::to_string),
                },
                None,
            )
            .await;
    }

    /// Advance progress by one
    pub async fn increment(&self) {
        let next = {
            let current = self.state.current.lock().await;
            *current + 1.0
        };
        self.update(next, None).await;
    }

    /// Emit the terminal `progress == total` notification.
    ///
    /// Called on scope close; also invoked by the executor on every exit
    /// path, including tool failure.
    pub async fn finish(&self) {
        {
            let mut finished = self.state.finished.lock().await;
            if *finished {
                return;
            }
            *finished = true;
        }
        let (Some(token), Some(total)) = (self.state.token.clone(), self.state.total) else {
            return;
        };
        let current = *self.state.current.lock().await;
        if (current - total).abs() < f64::EPSILON {
            return;
        }
        self.notifications
            .notify_progress(
                &self.session_id,
                ProgressParams {
                    progress_token: token,
                    progress: total,
                    total: Some(total),
                    message: None,
                },
                None,
            )
            .await;
    }
}

/// Per-call context handed to a tool handler
pub struct ToolContext {
    session: Arc<Session>,
    notifications: Arc<NotificationManager>,
    tool_name: String,
    request_id: RequestId,
    progress_token: Option<ProgressToken>,
    secrets: HashMap<String, String>,
    resolver: Arc<dyn SecretResolver>,
    auth_token: Option<String>,
    scopes: Mutex<Vec<Arc<ProgressState>>>,
}

impl ToolContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: Arc<Session>,
        notifications: Arc<NotificationManager>,
        tool_name: String,
        request_id: RequestId,
        progress_token: Option<ProgressToken>,
        secrets: HashMap<String, String>,
        resolver: Arc<dyn SecretResolver>,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            session,
            notifications,
            tool_name,
            request_id,
            progress_token,
            secrets,
            resolver,
            auth_token,
            scopes: Mutex::new(Vec::new()),
        }
    }

    /// Session this call belongs to
    #[inline]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Name of the tool being invoked
    #[inline]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// JSON-RPC id of the originating request
    #[inline]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    // ---- logging facet ----

    /// Emit a log notification at the given level.
    ///
    /// Suppressed when the level is below the session's minimum.
    pub async fn log(&self, level: LogLevel, data: Value) {
        if level < self.session.min_log_level().await {
            return;
        }
        self.notifications
            .notify_message(
                Some(self.session.id()),
                LoggingMessageParams {
                    level,
                    logger: Some(self.tool_name.clone()),
                    data,
                },
            )
            .await;
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, Value::String(message.into())).await;
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, Value::String(message.into())).await;
    }

    pub async fn notice(&self, message: impl Into<String>) {
        self.log(LogLevel::Notice, Value::String(message.into())).await;
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, Value::String(message.into())).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, Value::String(message.into())).await;
    }

    pub async fn critical(&self, message: impl Into<String>) {
        self.log(LogLevel::Critical, Value::String(message.into())).await;
    }

    pub async fn alert(&self, message: impl Into<String>) {
        self.log(LogLevel::Alert, Value::String(message.into())).await;
    }

    pub async fn emergency(&self, message: impl Into<String>) {
        self.log(LogLevel::Emergency, Value::String(message.into())).await;
    }

    // ---- progress facet ----

    /// Open a scoped progress tracker.
    ///
    /// The scope is finalized on every exit path; when `total` is declared
    /// a terminal `progress == total` notification is emitted at close.
    pub async fn progress(&self, total: Option<f64>) -> ProgressScope {
        let state = Arc::new(ProgressState {
            token: self.progress_token.clone(),
            total,
            current: Mutex::new(0.0),
            finished: Mutex::new(false),
        });
        self.scopes.lock().await.push(Arc::clone(&state));
        ProgressScope {
            state,
            notifications: Arc::clone(&self.notifications),
            session_id: self.session.id().to_string(),
        }
    }

    /// Close any progress scopes the tool left open
    pub(crate) async fn finalize_progress(&self) {
        let states: Vec<Arc<ProgressState>> = self.scopes.lock().await.drain(..).collect();
        for state in states {
            let scope = ProgressScope {
                state,
                notifications: Arc::clone(&self.notifications),
                session_id: self.session.id().to_string(),
            };
            scope.finish().await;
        }
    }

    // ---- secrets & metadata ----

    /// Read a declared secret.
    ///
    /// Only names listed in the tool's `requires_secrets` are accessible.
    pub fn get_secret(&self, name: &str) -> Result<&str> {
        self.secrets
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "tool '{}' did not declare secret '{}'",
                    self.tool_name,
                    name
                )
            })
    }

    /// Read a metadata value from the injected resolver
    pub async fn get_metadata(&self, key: &str) -> Option<String> {
        self.resolver.metadata(key).await
    }

    /// Bearer token, present when the tool declared `requires_auth`
    #[inline]
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    // ---- cancellation ----

    /// Whether the client cancelled the originating request
    pub async fn is_cancelled(&self) -> bool {
        self.session.is_cancelled(&self.request_id).await
    }

    /// Bail out with [`ToolCancelled`] if the request was cancelled
    pub async fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled().await {
            Err(ToolCancelled.into())
        } else {
            Ok(())
        }
    }

    // ---- client API ----

    /// Request an LLM completion from the client (`sampling/createMessage`)
    pub async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> McpResult<CreateMessageResult> {
        if !self.session.client_supports_sampling().await {
            return Err(McpError::CapabilityNotSupported {
                capability: "sampling".to_string(),
            });
        }
        let value = self
            .session
            .requests()
            .request(
                "sampling/createMessage",
                Some(serde_json::to_value(params).map_err(McpError::from)?),
                None,
            )
            .await?;
        serde_json::from_value(value).map_err(McpError::from)
    }

    /// List the client's filesystem roots (`roots/list`)
    pub async fn list_roots(&self) -> McpResult<Vec<Root>> {
        if !self.session.client_supports_roots().await {
            return Err(McpError::CapabilityNotSupported {
                capability: "roots".to_string(),
            });
        }
        let value = self.session.requests().request("roots/list", None, None).await?;
        let result: ListRootsResult = serde_json::from_value(value).map_err(McpError::from)?;
        Ok(result.roots)
    }

    /// Ask the user for structured input (`elicitation/create`).
    ///
    /// The requested schema is restricted to flat objects of primitive
    /// properties per the protocol's elicitation rules.
    pub async fn elicit(&self, message: &str, schema: Value) -> McpResult<ElicitResult> {
        if !self.session.client_supports_elicitation().await {
            return Err(McpError::CapabilityNotSupported {
                capability: "elicitation".to_string(),
            });
        }
        validate_elicitation_schema(&schema)?;
        let params = ElicitParams {
            message: message.to_string(),
            requested_schema: schema,
        };
        let value = self
            .session
            .requests()
            .request(
                "elicitation/create",
                Some(serde_json::to_value(params).map_err(McpError::from)?),
                None,
            )
            .await?;
        serde_json::from_value(value).map_err(McpError::from)
    }

    /// Ask the client to complete an argument value (`completion/complete`)
    pub async fn complete(&self, params: CompleteParams) -> McpResult<CompleteResult> {
        if !self.session.client_supports_completions().await {
            return Err(McpError::CapabilityNotSupported {
                capability: "completions".to_string(),
            });
        }
        let value = self
            .session
            .requests()
            .request(
                "completion/complete",
                Some(serde_json::to_value(params).map_err(McpError::from)?),
                None,
            )
            .await?;
        serde_json::from_value(value).map_err(McpError::from)
    }
}

/// Validate an elicitation schema: a flat object of primitive properties
fn validate_elicitation_schema(schema: &Value) -> McpResult<()> {
    let invalid = |message: String| McpError::InvalidParams { message };

    let obj = schema
        .as_object()
        .ok_or_else(|| invalid("elicitation schema must be an object".to_string()))?;
    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("elicitation schema must have type 'object'".to_string()));
    }

    if let Some(properties) = obj.get("properties") {
        let properties = properties
            .as_object()
            .ok_or_else(|| invalid("elicitation properties must be an object".to_string()))?;
        for (name, prop) in properties {
            let prop_type = prop.get("type").and_then(Value::as_str);
            match prop_type {
                Some("string") | Some("number") | Some("integer") | Some("boolean") => {}
                other => {
                    return Err(invalid(format!(
                        "elicitation property '{}' has unsupported type {:?}",
                        name, other
                    )));
                }
            }
        }
    }

    Ok(())
}
