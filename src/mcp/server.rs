//! MCP Server Implementation
//!
//! The message processor and dispatcher: typed parse, middleware chain,
//! lifecycle enforcement, method routing, and response construction.
//! Transports decode frames and hand JSON values to [`McpServer::handle_value`];
//! everything protocol-shaped happens here.

use crate::config::ServerSettings;
use crate::mcp::context::{AuthProvider, EnvAuthProvider, EnvSecretResolver, SecretResolver, ToolCancelled, ToolContext};
use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::notifications::NotificationManager;
use crate::mcp::protocol::*;
use crate::mcp::session::{MessageSink, Session, SessionRegistry, SessionState};
use crate::mcp::tools::ToolRegistry;
use crate::mcp::validation::{McpValidator, validate_tool_arguments};
use anyhow::Result;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of routing one request: a result value, or nothing when the
/// response is deliberately suppressed (consumed cancellation).
pub type RouteOutcome = McpResult<Option<Value>>;

/// Per-request context visible to middleware
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: String,
    pub method: String,
    pub id: Option<RequestId>,
}

/// Middleware wraps request handling with before/after hooks.
///
/// `on_response` runs in reverse registration order and may rewrite the
/// outcome.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn on_request(&self, ctx: &RequestContext) {
        let _ = ctx;
    }

    async fn on_response(
        &self,
        ctx: &RequestContext,
        outcome: RouteOutcome,
        elapsed: Duration,
    ) -> RouteOutcome {
        let _ = (ctx, elapsed);
        outcome
    }
}

/// Built-in middleware recording method, id, elapsed time, and outcome
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn on_request(&self, ctx: &RequestContext) {
        debug!(
            session = %ctx.session_id,
            method = %ctx.method,
            id = ?ctx.id,
            "request received"
        );
    }

    async fn on_response(
        &self,
        ctx: &RequestContext,
        outcome: RouteOutcome,
        elapsed: Duration,
    ) -> RouteOutcome {
        match &outcome {
            Ok(Some(_)) => debug!(
                session = %ctx.session_id,
                method = %ctx.method,
                id = ?ctx.id,
                elapsed_ms = elapsed.as_millis() as u64,
                "request completed"
            ),
            Ok(None) => debug!(
                session = %ctx.session_id,
                method = %ctx.method,
                id = ?ctx.id,
                elapsed_ms = elapsed.as_millis() as u64,
                "response suppressed"
            ),
            Err(e) => info!(
                session = %ctx.session_id,
                method = %ctx.method,
                id = ?ctx.id,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "request failed"
            ),
        }
        outcome
    }
}

/// Built-in middleware logging failures through the error taxonomy
pub struct ErrorHandlingMiddleware;

#[async_trait]
impl Middleware for ErrorHandlingMiddleware {
    async fn on_response(
        &self,
        _ctx: &RequestContext,
        outcome: RouteOutcome,
        _elapsed: Duration,
    ) -> RouteOutcome {
        if let Err(e) = &outcome {
            e.log();
        }
        outcome
    }
}

/// Composed middleware chain
pub struct MessageProcessor {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MessageProcessor {
    /// Chain with the built-in logging and error-handling middleware
    pub fn with_builtins() -> Self {
        Self {
            middleware: vec![
                Arc::new(LoggingMiddleware) as Arc<dyn Middleware>,
                Arc::new(ErrorHandlingMiddleware) as Arc<dyn Middleware>,
            ],
        }
    }

    /// Append custom middleware to the chain
    pub fn push(&mut self, mw: Arc<dyn Middleware>) {
        self.middleware.push(mw);
    }

    /// Run the endpoint wrapped by the chain
    pub async fn dispatch<F>(&self, ctx: &RequestContext, endpoint: F) -> RouteOutcome
    where
        F: std::future::Future<Output = RouteOutcome>,
    {
        for mw in &self.middleware {
            mw.on_request(ctx).await;
        }

        let started = Instant::now();
        let mut outcome = endpoint.await;
        let elapsed = started.elapsed();

        for mw in self.middleware.iter().rev() {
            outcome = mw.on_response(ctx, outcome, elapsed).await;
        }
        outcome
    }
}

/// Supplies resources; the shipped default has none
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn list_resources(&self) -> Result<Vec<Resource>>;
    async fn list_templates(&self) -> Result<Vec<ResourceTemplate>>;
    async fn read(&self, uri: &str) -> Result<Vec<EmbeddedResource>>;
}

/// Resource provider with no resources
pub struct EmptyResourceProvider;

#[async_trait]
impl ResourceProvider for EmptyResourceProvider {
    async fn list_resources(&self) -> Result<Vec<Resource>> {
        Ok(Vec::new())
    }

    async fn list_templates(&self) -> Result<Vec<ResourceTemplate>> {
        Ok(Vec::new())
    }

    async fn read(&self, uri: &str) -> Result<Vec<EmbeddedResource>> {
        anyhow::bail!("resource not found: {}", uri)
    }
}

/// Supplies prompts; the shipped default has none
#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn list_prompts(&self) -> Result<Vec<Prompt>>;
    async fn get(&self, name: &str, arguments: Option<HashMap<String, String>>)
        -> Result<GetPromptResult>;
}

/// Prompt provider with no prompts
pub struct EmptyPromptProvider;

#[async_trait]
impl PromptProvider for EmptyPromptProvider {
    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        Ok(Vec::new())
    }

    async fn get(
        &self,
        name: &str,
        _arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        anyhow::bail!("prompt not found: {}", name)
    }
}

/// Serves `completion/complete`; the shipped default completes to nothing
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, params: CompleteParams) -> Result<CompleteResult>;
}

/// Completion provider returning empty value lists
pub struct EmptyCompletionProvider;

#[async_trait]
impl CompletionProvider for EmptyCompletionProvider {
    async fn complete(&self, _params: CompleteParams) -> Result<CompleteResult> {
        Ok(CompleteResult {
            completion: Completion {
                values: Vec::new(),
                total: Some(0),
                has_more: Some(false),
            },
        })
    }
}

/// Page size for the paginated list methods
const DEFAULT_PAGE_SIZE: usize = 50;

/// Server identity and behavior knobs
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub server_info: Implementation,
    pub instructions: Option<String>,
    pub mask_error_details: bool,
    pub min_log_level: LogLevel,
    pub request_timeout: Duration,
    pub page_size: usize,
}

impl ServerOptions {
    /// Derive options from runtime settings
    pub fn from_settings(settings: &ServerSettings, name: &str, version: &str) -> Self {
        Self {
            server_info: Implementation {
                name: name.to_string(),
                version: version.to_string(),
                title: None,
            },
            instructions: None,
            mask_error_details: settings.mask_error_details,
            min_log_level: settings.log_level_floor(),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Attach client-facing usage instructions
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// MCP server core: session registry, dispatcher, and collaborators
pub struct McpServer {
    options: ServerOptions,
    validator: McpValidator,
    processor: MessageProcessor,
    registry: Arc<ToolRegistry>,
    resources: Arc<dyn ResourceProvider>,
    prompts: Arc<dyn PromptProvider>,
    completions: Arc<dyn CompletionProvider>,
    secrets: Arc<dyn SecretResolver>,
    auth: Arc<dyn AuthProvider>,
    sessions: SessionRegistry,
    notifications: Arc<NotificationManager>,
}

impl McpServer {
    /// Create a server with default (empty/env-backed) collaborators
    pub fn new(
        options: ServerOptions,
        settings: &ServerSettings,
        registry: Arc<ToolRegistry>,
    ) -> Result<Self> {
        let sessions = SessionRegistry::new();
        let notifications = NotificationManager::new(
            sessions.clone(),
            settings.rate_limit_per_minute,
            settings.default_debounce_ms,
            settings.max_queued_notifications,
        );
        let validator = McpValidator::new()?;

        Ok(Self {
            options,
            validator,
            processor: MessageProcessor::with_builtins(),
            registry,
            resources: Arc::new(EmptyResourceProvider),
            prompts: Arc::new(EmptyPromptProvider),
            completions: Arc::new(EmptyCompletionProvider),
            secrets: Arc::new(EnvSecretResolver),
            auth: Arc::new(EnvAuthProvider),
            sessions,
            notifications,
        })
    }

    pub fn with_resources(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.resources = provider;
        self
    }

    pub fn with_prompts(mut self, provider: Arc<dyn PromptProvider>) -> Self {
        self.prompts = provider;
        self
    }

    pub fn with_completions(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.completions = provider;
        self
    }

    pub fn with_secrets(mut self, resolver: Arc<dyn SecretResolver>) -> Self {
        self.secrets = resolver;
        self
    }

    pub fn with_auth(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = provider;
        self
    }

    pub fn with_middleware(mut self, mw: Arc<dyn Middleware>) -> Self {
        self.processor.push(mw);
        self
    }

    /// The session registry shared with transports
    #[inline]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// The process-wide notification manager
    #[inline]
    pub fn notifications(&self) -> &Arc<NotificationManager> {
        &self.notifications
    }

    /// The tool catalog
    #[inline]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Server identity options
    #[inline]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Create and register a session for a new connection
    pub async fn open_session(&self, id: impl Into<String>, sink: Arc<dyn MessageSink>) -> Arc<Session> {
        let session = Session::new(
            id,
            sink,
            self.options.min_log_level,
            self.options.request_timeout,
        );
        self.sessions.insert(Arc::clone(&session)).await;
        session
    }

    /// Close and deregister a session (transport EOF or explicit termination)
    pub async fn close_session(&self, id: &str) {
        self.notifications.forget_session(id).await;
        self.sessions.remove(id).await;
    }

    /// Handle one decoded JSON value from a session's connection.
    ///
    /// Returns the message to write back, if any.
    pub async fn handle_value(&self, session: &Arc<Session>, value: Value) -> Option<JsonRpcMessage> {
        let message = match self.validator.validate_raw_message(&value) {
            Ok(message) => message,
            Err(e) => {
                let id = value
                    .get("id")
                    .and_then(|id| serde_json::from_value(id.clone()).ok());
                return Some(e.to_error_response(id, self.options.mask_error_details));
            }
        };

        match message {
            JsonRpcMessage::Request(request) => self.handle_request(session, request).await,
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(session, notification).await;
                None
            }
            JsonRpcMessage::Response(response) => {
                session
                    .requests()
                    .resolve(&response.id, response.result)
                    .await;
                None
            }
            JsonRpcMessage::ErrorResponse(response) => {
                if let Some(id) = response.id {
                    session.requests().reject(&id, response.error).await;
                } else {
                    warn!(session = %session.id(), "error response without id from client");
                }
                None
            }
        }
    }

    /// Handle a JSON-RPC request end to end
    pub async fn handle_request(
        &self,
        session: &Arc<Session>,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcMessage> {
        let ctx = RequestContext {
            session_id: session.id().to_string(),
            method: request.method.clone(),
            id: Some(request.id.clone()),
        };

        let outcome = self
            .processor
            .dispatch(&ctx, self.route_request(session, &request))
            .await;

        match outcome {
            Ok(Some(result)) => Some(JsonRpcMessage::Response(JsonRpcResponse::new(
                result,
                request.id,
            ))),
            Ok(None) => None,
            Err(e) => {
                Some(e.to_error_response(Some(request.id), self.options.mask_error_details))
            }
        }
    }

    /// Route a request to its handler, enforcing lifecycle rules first
    async fn route_request(&self, session: &Arc<Session>, request: &JsonRpcRequest) -> RouteOutcome {
        let state = session.state().await;
        if state == SessionState::Closed {
            return Err(McpError::SessionClosed);
        }
        if state != SessionState::Ready
            && request.method != "initialize"
            && request.method != "ping"
        {
            return Err(McpError::NotInitialized);
        }

        if let Some(params) = &request.params {
            self.validator
                .validate_method_params(&request.method, params)
                .map_err(|e| McpError::InvalidParams {
                    message: e.to_string(),
                })?;
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(session, request).await,
            "ping" => Ok(Some(serde_json::json!({}))),
            "tools/list" => self.handle_list_tools(request).await,
            "tools/call" => self.handle_call_tool(session, request).await,
            "resources/list" => self.handle_list_resources(request).await,
            "resources/templates/list" => self.handle_list_resource_templates(request).await,
            "resources/read" => self.handle_read_resource(request).await,
            "prompts/list" => self.handle_list_prompts(request).await,
            "prompts/get" => self.handle_get_prompt(request).await,
            "logging/setLevel" => self.handle_set_level(session, request).await,
            "completion/complete" => self.handle_complete(request).await,
            method => Err(McpError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }

    /// Handle a JSON-RPC notification; unknown methods are dropped
    async fn handle_notification(&self, session: &Arc<Session>, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                if session.mark_initialized().await {
                    info!(session = %session.id(), "session ready");
                }
            }
            "notifications/cancelled" => {
                let Some(params) = notification.params else {
                    debug!(session = %session.id(), "cancelled notification without params");
                    return;
                };
                match serde_json::from_value::<CancelledParams>(params) {
                    Ok(cancelled) => {
                        info!(
                            session = %session.id(),
                            id = %cancelled.request_id,
                            reason = ?cancelled.reason,
                            "request cancelled by client"
                        );
                        session.mark_cancelled(cancelled.request_id).await;
                    }
                    Err(e) => {
                        debug!(session = %session.id(), error = %e, "malformed cancelled notification");
                    }
                }
            }
            other => {
                debug!(session = %session.id(), method = %other, "dropping unknown notification");
            }
        }
    }

    async fn handle_initialize(
        &self,
        session: &Arc<Session>,
        request: &JsonRpcRequest,
    ) -> RouteOutcome {
        let params = request.params.clone().ok_or_else(|| McpError::InvalidParams {
            message: "initialize requires parameters".to_string(),
        })?;
        let params: InitializeParams =
            serde_json::from_value(params).map_err(McpError::from)?;

        session.begin_initialize().await?;

        let Some(version) = negotiate_protocol_version(&params.protocol_version) else {
            session.abort_initialize().await;
            return Err(McpError::UnsupportedProtocolVersion {
                version: params.protocol_version,
                supported: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|v| (*v).to_string())
                    .collect(),
            });
        };

        let server_capabilities = self.server_capabilities();
        session
            .store_negotiation(
                version.to_string(),
                params.capabilities,
                server_capabilities.clone(),
            )
            .await;

        info!(
            session = %session.id(),
            client = %params.client_info.name,
            version = %version,
            "client initializing"
        );

        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: server_capabilities,
            server_info: self.options.server_info.clone(),
            instructions: self.options.instructions.clone(),
        };
        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
    }

    /// The capability map this server advertises
    pub fn server_capabilities(&self) -> ServerCapabilities {
        let mut notifications = HashMap::new();
        for method in [
            "notifications/progress",
            "notifications/message",
            "notifications/resources/updated",
            "notifications/resources/list_changed",
            "notifications/prompts/list_changed",
            "notifications/tools/list_changed",
        ] {
            notifications.insert(method.to_string(), true);
        }

        ServerCapabilities {
            experimental: None,
            logging: Some(LoggingCapability {}),
            prompts: Some(PromptsCapability {
                list_changed: Some(true),
            }),
            resources: Some(ResourcesCapability {
                subscribe: Some(false),
                list_changed: Some(true),
            }),
            tools: Some(ToolsCapability {
                list_changed: Some(true),
            }),
            completions: Some(CompletionsCapability {}),
            notifications: Some(notifications),
        }
    }

    async fn handle_list_tools(&self, request: &JsonRpcRequest) -> RouteOutcome {
        let params = parse_paginated(request)?;
        let tools = self.registry.snapshot().await;
        let (page, next_cursor) = paginate(tools, &params.cursor, self.options.page_size)?;

        let result = ListToolsResult {
            tools: page,
            next_cursor,
        };
        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
    }

    async fn handle_call_tool(
        &self,
        session: &Arc<Session>,
        request: &JsonRpcRequest,
    ) -> RouteOutcome {
        let params = request.params.clone().ok_or_else(|| McpError::InvalidParams {
            message: "tools/call requires parameters".to_string(),
        })?;
        let params: CallToolParams = serde_json::from_value(params).map_err(McpError::from)?;

        let registered = self
            .registry
            .get(&params.name)
            .await
            .ok_or_else(|| McpError::UnknownTool {
                name: params.name.clone(),
            })?;

        let arguments = params.arguments.unwrap_or_default();
        validate_tool_arguments(
            &params.name,
            registered.input_schema(),
            &Value::Object(arguments.clone()),
        )?;

        // Auth and secret dependencies are checked before invocation;
        // failures here are protocol errors, not tool errors.
        let auth_token = if registered.tool.requires_auth {
            let token = self.auth.bearer_token(session.id()).await;
            match token {
                Some(token) if !token.is_empty() => Some(token),
                _ => {
                    return Err(McpError::MissingAuth {
                        tool: params.name.clone(),
                    });
                }
            }
        } else {
            None
        };

        let mut secrets = HashMap::new();
        for name in &registered.tool.requires_secrets {
            let value = self.secrets.secret(name).await.ok_or_else(|| {
                McpError::MissingSecret {
                    tool: params.name.clone(),
                    name: name.clone(),
                }
            })?;
            secrets.insert(name.clone(), value);
        }

        let progress_token = params.meta.and_then(|meta| meta.progress_token);
        if let Some(token) = &progress_token {
            session.register_progress_token(token.clone()).await;
        }

        let ctx = ToolContext::new(
            Arc::clone(session),
            Arc::clone(&self.notifications),
            params.name.clone(),
            request.id.clone(),
            progress_token.clone(),
            secrets,
            Arc::clone(&self.secrets),
            auth_token,
        );

        let outcome = registered.handler().call(&ctx, arguments).await;

        // Progress scopes close on every exit path.
        ctx.finalize_progress().await;
        if let Some(token) = &progress_token {
            session.release_progress_token(token).await;
        }
        let cancelled = session.is_cancelled(&request.id).await;
        session.clear_cancelled(&request.id).await;

        let result = match outcome {
            Ok(output) => {
                let has_output_schema = registered.output_schema().is_some();
                if let (Some(schema), Some(structured)) =
                    (registered.output_schema(), output.structured.as_ref())
                {
                    if !schema.is_valid(structured) {
                        warn!(tool = %params.name, "structured content does not match output schema");
                        CallToolResult {
                            content: vec![ContentBlock::text(format!(
                                "tool '{}' returned structured content that does not match its output schema",
                                params.name
                            ))],
                            structured_content: None,
                            is_error: Some(true),
                        }
                    } else {
                        output.into_call_result(has_output_schema)
                    }
                } else {
                    output.into_call_result(has_output_schema)
                }
            }
            Err(e) if e.is::<ToolCancelled>() => {
                // The tool consumed the cancellation; the client has already
                // abandoned this id, so no response is written.
                debug!(tool = %params.name, "tool observed cancellation");
                return Ok(None);
            }
            Err(e) => {
                let reason = if cancelled {
                    format!("cancelled: {}", e)
                } else {
                    e.to_string()
                };
                CallToolResult {
                    content: vec![ContentBlock::text(reason)],
                    structured_content: None,
                    is_error: Some(true),
                }
            }
        };

        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
    }

    async fn handle_list_resources(&self, request: &JsonRpcRequest) -> RouteOutcome {
        let params = parse_paginated(request)?;
        let resources = self
            .resources
            .list_resources()
            .await
            .map_err(McpError::from)?;
        let (page, next_cursor) = paginate(resources, &params.cursor, self.options.page_size)?;

        let result = ListResourcesResult {
            resources: page,
            next_cursor,
        };
        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
    }

    async fn handle_list_resource_templates(&self, request: &JsonRpcRequest) -> RouteOutcome {
        let params = parse_paginated(request)?;
        let templates = self
            .resources
            .list_templates()
            .await
            .map_err(McpError::from)?;
        let (page, next_cursor) = paginate(templates, &params.cursor, self.options.page_size)?;

        let result = ListResourceTemplatesResult {
            resource_templates: page,
            next_cursor,
        };
        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
    }

    async fn handle_read_resource(&self, request: &JsonRpcRequest) -> RouteOutcome {
        let params = request.params.clone().ok_or_else(|| McpError::InvalidParams {
            message: "resources/read requires parameters".to_string(),
        })?;
        let params: ReadResourceParams =
            serde_json::from_value(params).map_err(McpError::from)?;

        let contents = self
            .resources
            .read(&params.uri)
            .await
            .map_err(|e| McpError::InvalidParams {
                message: e.to_string(),
            })?;

        let result = ReadResourceResult { contents };
        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
    }

    async fn handle_list_prompts(&self, request: &JsonRpcRequest) -> RouteOutcome {
        let params = parse_paginated(request)?;
        let prompts = self.prompts.list_prompts().await.map_err(McpError::from)?;
        let (page, next_cursor) = paginate(prompts, &params.cursor, self.options.page_size)?;

        let result = ListPromptsResult {
            prompts: page,
            next_cursor,
        };
        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
    }

    async fn handle_get_prompt(&self, request: &JsonRpcRequest) -> RouteOutcome {
        let params = request.params.clone().ok_or_else(|| McpError::InvalidParams {
            message: "prompts/get requires parameters".to_string(),
        })?;
        let params: GetPromptParams = serde_json::from_value(params).map_err(McpError::from)?;

        let result = self
            .prompts
            .get(&params.name, params.arguments)
            .await
            .map_err(|e| McpError::InvalidParams {
                message: e.to_string(),
            })?;
        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
    }

    async fn handle_set_level(
        &self,
        session: &Arc<Session>,
        request: &JsonRpcRequest,
    ) -> RouteOutcome {
        let params = request.params.clone().ok_or_else(|| McpError::InvalidParams {
            message: "logging/setLevel requires parameters".to_string(),
        })?;
        let params: SetLevelParams = serde_json::from_value(params).map_err(McpError::from)?;

        match params.level.parse::<LogLevel>() {
            Ok(level) => {
                session.set_min_log_level(level).await;
                info!(session = %session.id(), level = %level, "log level updated");
            }
            Err(_) => {
                // Unknown levels still return success per the protocol.
                warn!(session = %session.id(), level = %params.level, "ignoring unknown log level");
            }
        }
        Ok(Some(serde_json::json!({})))
    }

    async fn handle_complete(&self, request: &JsonRpcRequest) -> RouteOutcome {
        let params = request.params.clone().ok_or_else(|| McpError::InvalidParams {
            message: "completion/complete requires parameters".to_string(),
        })?;
        let params: CompleteParams = serde_json::from_value(params).map_err(McpError::from)?;

        let result = self
            .completions
            .complete(params)
            .await
            .map_err(McpError::from)?;
        Ok(Some(serde_json::to_value(result).map_err(McpError::from)?))
    }
}

fn parse_paginated(request: &JsonRpcRequest) -> McpResult<PaginatedParams> {
    match &request.params {
        Some(params) => serde_json::from_value(params.clone()).map_err(McpError::from),
        None => Ok(PaginatedParams::default()),
    }
}

fn encode_cursor(offset: usize) -> String {
    BASE64.encode(format!("o:{}", offset))
}

fn decode_cursor(cursor: &str) -> McpResult<usize> {
    let bytes = BASE64.decode(cursor).map_err(|_| McpError::InvalidCursor)?;
    let text = String::from_utf8(bytes).map_err(|_| McpError::InvalidCursor)?;
    let offset = text.strip_prefix("o:").ok_or(McpError::InvalidCursor)?;
    offset.parse().map_err(|_| McpError::InvalidCursor)
}

/// Slice a snapshot by opaque cursor; unknown cursors are invalid params
fn paginate<T>(
    items: Vec<T>,
    cursor: &Option<String>,
    page_size: usize,
) -> McpResult<(Vec<T>, Option<String>)> {
    let offset = match cursor {
        Some(cursor) => {
            let offset = decode_cursor(cursor)?;
            if offset > items.len() {
                return Err(McpError::InvalidCursor);
            }
            offset
        }
        None => 0,
    };

    let end = (offset + page_size).min(items.len());
    let next_cursor = (end < items.len()).then(|| encode_cursor(end));
    let page = items.into_iter().skip(offset).take(page_size).collect();
    Ok((page, next_cursor))
}
