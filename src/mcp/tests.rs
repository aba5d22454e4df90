//! MCP Dispatcher Tests
//!
//! Unit tests for lifecycle enforcement, method routing, tool invocation,
//! and server-initiated requests, driven through the same entry point the
//! transports use.

use super::context::ToolContext;
use super::protocol::*;
use super::server::{McpServer, ServerOptions};
use super::session::{ChannelSink, MessageSink, Session, SessionState};
use super::tools::{ToolHandler, ToolOutput, ToolRegistry};
use crate::config::ServerSettings;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Echo tool: one text block per item, with a progress update per item
struct EchoHandler;

#[async_trait]
impl ToolHandler for EchoHandler {
    async fn call(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<ToolOutput> {
        let items: Vec<String> = arguments
            .get("items")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let scope = ctx.progress(Some(items.len() as f64)).await;
        let mut content = Vec::new();
        for (index, item) in items.iter().enumerate() {
            scope.update((index + 1) as f64, Some(item)).await;
            content.push(ContentBlock::text(item.clone()));
        }

        Ok(ToolOutput {
            content,
            structured: None,
        })
    }
}

/// Tool that always fails
struct FailingHandler;

#[async_trait]
impl ToolHandler for FailingHandler {
    async fn call(
        &self,
        _ctx: &ToolContext,
        _arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<ToolOutput> {
        anyhow::bail!("the disk is on fire")
    }
}

/// Tool that observes cancellation and bails out
struct CancelAwareHandler;

#[async_trait]
impl ToolHandler for CancelAwareHandler {
    async fn call(
        &self,
        ctx: &ToolContext,
        _arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<ToolOutput> {
        ctx.check_cancelled().await?;
        Ok(ToolOutput::text("finished"))
    }
}

/// Tool that reads its declared secret
struct SecretHandler;

#[async_trait]
impl ToolHandler for SecretHandler {
    async fn call(
        &self,
        ctx: &ToolContext,
        _arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<ToolOutput> {
        let value = ctx.get_secret("ECHO_TOKEN")?;
        Ok(ToolOutput::text(format!("secret:{}", value)))
    }
}

/// Tool that asks the client to complete an argument value
struct CompletingHandler;

#[async_trait]
impl ToolHandler for CompletingHandler {
    async fn call(
        &self,
        ctx: &ToolContext,
        _arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<ToolOutput> {
        let params = CompleteParams {
            reference: json!({"type": "ref/prompt", "name": "greeting"}),
            argument: CompleteArgument {
                name: "name".to_string(),
                value: "al".to_string(),
            },
        };
        let result = ctx.complete(params).await?;
        Ok(ToolOutput::text(result.completion.values.join(",")))
    }
}

/// Tool that asks the client for its roots
struct RootsHandler;

#[async_trait]
impl ToolHandler for RootsHandler {
    async fn call(
        &self,
        ctx: &ToolContext,
        _arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<ToolOutput> {
        let roots = ctx.list_roots().await?;
        Ok(ToolOutput::text(format!("{} roots", roots.len())))
    }
}

fn echo_tool() -> Tool {
    Tool {
        name: "echo".to_string(),
        description: Some("Echo items back with progress".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["items"],
            "additionalProperties": false
        }),
        output_schema: None,
        annotations: None,
        requires_auth: false,
        requires_secrets: Vec::new(),
    }
}

fn plain_tool(name: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: None,
        input_schema: json!({"type": "object"}),
        output_schema: None,
        annotations: None,
        requires_auth: false,
        requires_secrets: Vec::new(),
    }
}

async fn build_server(registry: ToolRegistry) -> Arc<McpServer> {
    let mut settings = ServerSettings::default();
    // Tests assert on individual notifications; coalescing would hide them.
    settings.default_debounce_ms = 0;
    let options = ServerOptions::from_settings(&settings, "test-server", "1.0.0")
        .with_instructions("test instructions");
    Arc::new(
        McpServer::new(options, &settings, Arc::new(registry)).expect("server builds"),
    )
}

async fn open_session(server: &Arc<McpServer>) -> (Arc<Session>, mpsc::Receiver<Value>) {
    let (tx, rx) = mpsc::channel(256);
    let session = server
        .open_session(
            uuid::Uuid::new_v4().to_string(),
            Arc::new(ChannelSink::new(tx)) as Arc<dyn MessageSink>,
        )
        .await;
    (session, rx)
}

fn request(method: &str, params: Value, id: i64) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "params": params, "id": id})
}

fn initialize_params(capabilities: Value) -> Value {
    json!({
        "protocolVersion": MCP_VERSION,
        "capabilities": capabilities,
        "clientInfo": {"name": "test-client", "version": "1.0.0"}
    })
}

async fn handshake(server: &Arc<McpServer>, session: &Arc<Session>, capabilities: Value) {
    let response = server
        .handle_value(session, request("initialize", initialize_params(capabilities), 1))
        .await
        .expect("initialize responds");
    assert!(matches!(response, JsonRpcMessage::Response(_)));

    let none = server
        .handle_value(
            session,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;
    assert!(none.is_none());
    assert_eq!(session.state().await, SessionState::Ready);
}

fn error_code(message: &JsonRpcMessage) -> i32 {
    if let JsonRpcMessage::ErrorResponse(resp) = message {
        resp.error.code
    } else {
        panic!("Expected error response, got {:?}", message);
    }
}

fn result_of(message: JsonRpcMessage) -> Value {
    if let JsonRpcMessage::Response(resp) = message {
        resp.result
    } else {
        panic!("Expected success response, got {:?}", message);
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn requests_before_ready_are_rejected() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;

        let response = server
            .handle_value(&session, request("tools/list", json!({}), 1))
            .await
            .expect("error response");
        assert_eq!(error_code(&response), mcp_error_codes::NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn ping_is_allowed_before_initialize() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;

        let response = server
            .handle_value(&session, request("ping", json!({}), 1))
            .await
            .expect("ping responds");
        assert_eq!(result_of(response), json!({}));
    }

    #[tokio::test]
    async fn initialize_negotiates_and_reports_server_info() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;

        let response = server
            .handle_value(&session, request("initialize", initialize_params(json!({})), 1))
            .await
            .expect("initialize responds");
        let result = result_of(response);

        assert_eq!(result["protocolVersion"], MCP_VERSION);
        assert_eq!(result["serverInfo"]["name"], "test-server");
        assert_eq!(result["instructions"], "test instructions");
        assert!(result["capabilities"]["tools"].is_object());

        assert_eq!(session.state().await, SessionState::Initializing);
        assert_eq!(
            session.protocol_version().await.as_deref(),
            Some(MCP_VERSION)
        );
    }

    #[tokio::test]
    async fn unsupported_version_fails_with_supported_list() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;

        let params = json!({
            "protocolVersion": "1999-01-01",
            "capabilities": {},
            "clientInfo": {"name": "c", "version": "0"}
        });
        let response = server
            .handle_value(&session, request("initialize", params, 1))
            .await
            .expect("error response");

        if let JsonRpcMessage::ErrorResponse(resp) = response {
            assert_eq!(resp.error.code, error_codes::INVALID_PARAMS);
            let data = resp.error.data.expect("supported list present");
            assert_eq!(data["supported"][0], MCP_VERSION);
        } else {
            panic!("Expected error response");
        }

        // The failed handshake rolls back; a good initialize still works.
        let response = server
            .handle_value(&session, request("initialize", initialize_params(json!({})), 2))
            .await
            .expect("initialize responds");
        assert!(matches!(response, JsonRpcMessage::Response(_)));
    }

    #[tokio::test]
    async fn duplicate_initialize_is_invalid_request() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;

        server
            .handle_value(&session, request("initialize", initialize_params(json!({})), 1))
            .await
            .expect("first initialize responds");

        let response = server
            .handle_value(&session, request("initialize", initialize_params(json!({})), 2))
            .await
            .expect("second initialize responds");
        assert_eq!(error_code(&response), error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let response = server
            .handle_value(&session, request("llama/pet", json!({}), 9))
            .await
            .expect("error response");
        assert_eq!(error_code(&response), error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_notification_is_dropped() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;

        let none = server
            .handle_value(
                &session,
                json!({"jsonrpc": "2.0", "method": "notifications/unheard_of"}),
            )
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn ping_is_idempotent() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        for id in 10..13 {
            let response = server
                .handle_value(&session, request("ping", json!({}), id))
                .await
                .expect("ping responds");
            assert_eq!(result_of(response), json!({}));
        }
    }

    #[tokio::test]
    async fn set_level_updates_session_floor() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let response = server
            .handle_value(
                &session,
                request("logging/setLevel", json!({"level": "warning"}), 5),
            )
            .await
            .expect("setLevel responds");
        assert_eq!(result_of(response), json!({}));
        assert_eq!(session.min_log_level().await, LogLevel::Warning);

        // Unknown levels still return success and leave the floor alone.
        let response = server
            .handle_value(
                &session,
                request("logging/setLevel", json!({"level": "shouting"}), 6),
            )
            .await
            .expect("setLevel responds");
        assert_eq!(result_of(response), json!({}));
        assert_eq!(session.min_log_level().await, LogLevel::Warning);
    }
}

mod tool_calls {
    use super::*;

    #[tokio::test]
    async fn echo_call_emits_progress_and_content() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_tool(), EchoHandler)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, mut rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let params = json!({
            "name": "echo",
            "arguments": {"items": ["a", "b", "c"]},
            "_meta": {"progressToken": "p1"}
        });
        let response = server
            .handle_value(&session, request("tools/call", params, 7))
            .await
            .expect("call responds");
        let result = result_of(response);

        assert_eq!(result["isError"], false);
        let content = result["content"].as_array().expect("content array");
        let texts: Vec<&str> = content
            .iter()
            .map(|c| c["text"].as_str().expect("text block"))
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);

        let mut progress = Vec::new();
        while let Ok(Some(n)) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            if n["method"] == "notifications/progress" {
                assert_eq!(n["params"]["progressToken"], "p1");
                progress.push(n["params"]["progress"].as_f64().expect("progress value"));
            }
        }
        assert_eq!(progress, vec![1.0, 2.0, 3.0]);

        // The token is released once the originating request completes.
        assert!(
            !session
                .has_progress_token(&ProgressToken::String("p1".to_string()))
                .await
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_params() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let response = server
            .handle_value(
                &session,
                request("tools/call", json!({"name": "ghost", "arguments": {}}), 3),
            )
            .await
            .expect("error response");
        assert_eq!(error_code(&response), error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn invalid_arguments_carry_a_path() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_tool(), EchoHandler)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let params = json!({"name": "echo", "arguments": {"items": "not-an-array"}});
        let response = server
            .handle_value(&session, request("tools/call", params, 3))
            .await
            .expect("error response");

        if let JsonRpcMessage::ErrorResponse(resp) = response {
            assert_eq!(resp.error.code, error_codes::INVALID_PARAMS);
            assert!(resp.error.message.contains("/items"));
        } else {
            panic!("Expected error response");
        }
    }

    #[tokio::test]
    async fn tool_failure_is_data_not_protocol_error() {
        let registry = ToolRegistry::new();
        registry
            .register(plain_tool("broken"), FailingHandler)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let response = server
            .handle_value(
                &session,
                request("tools/call", json!({"name": "broken", "arguments": {}}), 4),
            )
            .await
            .expect("call responds");
        let result = result_of(response);

        assert_eq!(result["isError"], true);
        assert!(
            result["content"][0]["text"]
                .as_str()
                .expect("text block")
                .contains("disk is on fire")
        );
    }

    #[tokio::test]
    async fn consumed_cancellation_suppresses_the_response() {
        let registry = ToolRegistry::new();
        registry
            .register(plain_tool("cancellable"), CancelAwareHandler)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        // Cancellation arrives before the call is dispatched.
        server
            .handle_value(
                &session,
                json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/cancelled",
                    "params": {"requestId": 8, "reason": "user gave up"}
                }),
            )
            .await;

        let response = server
            .handle_value(
                &session,
                request("tools/call", json!({"name": "cancellable", "arguments": {}}), 8),
            )
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn completed_tool_responds_despite_cancellation() {
        let registry = ToolRegistry::new();
        registry
            .register(plain_tool("oblivious"), EchoishOblivious)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        server
            .handle_value(
                &session,
                json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/cancelled",
                    "params": {"requestId": 8}
                }),
            )
            .await;

        let response = server
            .handle_value(
                &session,
                request("tools/call", json!({"name": "oblivious", "arguments": {}}), 8),
            )
            .await
            .expect("response sent because the tool completed");
        assert_eq!(result_of(response)["isError"], false);
    }

    /// Tool that never checks for cancellation
    struct EchoishOblivious;

    #[async_trait]
    impl ToolHandler for EchoishOblivious {
        async fn call(
            &self,
            _ctx: &ToolContext,
            _arguments: serde_json::Map<String, Value>,
        ) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::text("done anyway"))
        }
    }

    #[tokio::test]
    async fn declared_secrets_are_injected() {
        let registry = ToolRegistry::new();
        let mut tool = plain_tool("secretive");
        tool.requires_secrets = vec!["ECHO_TOKEN".to_string()];
        registry
            .register(tool, SecretHandler)
            .await
            .expect("registers");

        let mut settings = ServerSettings::default();
        settings.default_debounce_ms = 0;
        let options = ServerOptions::from_settings(&settings, "test-server", "1.0.0");
        let server = Arc::new(
            McpServer::new(options, &settings, Arc::new(registry))
                .expect("server builds")
                .with_secrets(Arc::new(StaticSecrets)),
        );
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let response = server
            .handle_value(
                &session,
                request("tools/call", json!({"name": "secretive", "arguments": {}}), 2),
            )
            .await
            .expect("call responds");
        assert_eq!(
            result_of(response)["content"][0]["text"],
            "secret:s3cr3t"
        );
    }

    struct StaticSecrets;

    #[async_trait]
    impl crate::mcp::context::SecretResolver for StaticSecrets {
        async fn secret(&self, name: &str) -> Option<String> {
            (name == "ECHO_TOKEN").then(|| "s3cr3t".to_string())
        }

        async fn metadata(&self, _key: &str) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn missing_auth_fails_before_invocation() {
        let registry = ToolRegistry::new();
        let mut tool = plain_tool("locked");
        tool.requires_auth = true;
        registry
            .register(tool, FailingHandler)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let response = server
            .handle_value(
                &session,
                request("tools/call", json!({"name": "locked", "arguments": {}}), 2),
            )
            .await
            .expect("error response");

        // FailingHandler never ran: the error is protocol-level, not a
        // CallToolResult with is_error set.
        assert_eq!(error_code(&response), error_codes::INVALID_PARAMS);
    }
}

mod pagination {
    use super::*;

    #[tokio::test]
    async fn cursors_walk_the_catalog_without_overlap() {
        let registry = ToolRegistry::new();
        for i in 0..120 {
            registry
                .register(plain_tool(&format!("tool-{:03}", i)), super::FailingHandler)
                .await
                .expect("registers");
        }
        let server = build_server(registry).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({"cursor": c}),
                None => json!({}),
            };
            let response = server
                .handle_value(&session, request("tools/list", params, 1))
                .await
                .expect("list responds");
            let result = result_of(response);

            for tool in result["tools"].as_array().expect("tools array") {
                seen.push(tool["name"].as_str().expect("name").to_string());
            }
            match result["nextCursor"].as_str() {
                Some(next) => cursor = Some(next.to_string()),
                None => break,
            }
        }

        assert_eq!(seen.len(), 120);
        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 120, "no overlap, no gap");
    }

    #[tokio::test]
    async fn garbage_cursor_is_rejected() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let response = server
            .handle_value(
                &session,
                request("tools/list", json!({"cursor": "zzz-not-a-cursor"}), 2),
            )
            .await
            .expect("error response");
        assert_eq!(error_code(&response), error_codes::INVALID_PARAMS);
    }
}

mod client_requests {
    use super::*;

    #[tokio::test]
    async fn roots_request_round_trips_through_the_client() {
        let registry = ToolRegistry::new();
        registry
            .register(plain_tool("rooted"), RootsHandler)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, mut rx) = open_session(&server).await;
        handshake(&server, &session, json!({"roots": {"listChanged": true}})).await;

        let call_server = Arc::clone(&server);
        let call_session = Arc::clone(&session);
        let call = tokio::spawn(async move {
            call_server
                .handle_value(
                    &call_session,
                    request("tools/call", json!({"name": "rooted", "arguments": {}}), 5),
                )
                .await
        });

        // The server wrote a roots/list request to the session sink.
        let outbound = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("request written")
            .expect("value present");
        assert_eq!(outbound["method"], "roots/list");
        let request_id = outbound["id"].clone();

        // Play the client: answer with one root.
        let reply = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "result": {"roots": [{"uri": "file:///workspace", "name": "workspace"}]}
        });
        server.handle_value(&session, reply).await;

        let response = call
            .await
            .expect("task ran")
            .expect("call responds");
        assert_eq!(result_of(response)["content"][0]["text"], "1 roots");
    }

    #[tokio::test]
    async fn completion_request_round_trips_through_the_client() {
        let registry = ToolRegistry::new();
        registry
            .register(plain_tool("completer"), CompletingHandler)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, mut rx) = open_session(&server).await;
        handshake(&server, &session, json!({"completions": {}})).await;

        let call_server = Arc::clone(&server);
        let call_session = Arc::clone(&session);
        let call = tokio::spawn(async move {
            call_server
                .handle_value(
                    &call_session,
                    request("tools/call", json!({"name": "completer", "arguments": {}}), 6),
                )
                .await
        });

        let outbound = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("request written")
            .expect("value present");
        assert_eq!(outbound["method"], "completion/complete");
        assert_eq!(outbound["params"]["argument"]["value"], "al");
        let request_id = outbound["id"].clone();

        let reply = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "result": {"completion": {"values": ["alice", "albert"], "hasMore": false}}
        });
        server.handle_value(&session, reply).await;

        let response = call.await.expect("task ran").expect("call responds");
        assert_eq!(
            result_of(response)["content"][0]["text"],
            "alice,albert"
        );
    }

    #[tokio::test]
    async fn completion_without_capability_fails_the_call() {
        let registry = ToolRegistry::new();
        registry
            .register(plain_tool("completer"), CompletingHandler)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, _rx) = open_session(&server).await;
        // Client did not advertise completions.
        handshake(&server, &session, json!({})).await;

        let response = server
            .handle_value(
                &session,
                request("tools/call", json!({"name": "completer", "arguments": {}}), 6),
            )
            .await
            .expect("call responds");
        let result = result_of(response);
        assert_eq!(result["isError"], true);
    }

    #[tokio::test]
    async fn ungated_capability_fails_the_call() {
        let registry = ToolRegistry::new();
        registry
            .register(plain_tool("rooted"), RootsHandler)
            .await
            .expect("registers");
        let server = build_server(registry).await;
        let (session, _rx) = open_session(&server).await;
        // Client did not advertise roots.
        handshake(&server, &session, json!({})).await;

        let response = server
            .handle_value(
                &session,
                request("tools/call", json!({"name": "rooted", "arguments": {}}), 5),
            )
            .await
            .expect("call responds");

        // The capability failure surfaces as a tool error, not a hang.
        let result = result_of(response);
        assert_eq!(result["isError"], true);
    }
}

mod completion {
    use super::*;

    #[tokio::test]
    async fn complete_returns_empty_values_by_default() {
        let server = build_server(ToolRegistry::new()).await;
        let (session, _rx) = open_session(&server).await;
        handshake(&server, &session, json!({})).await;

        let params = json!({
            "ref": {"type": "ref/prompt", "name": "greeting"},
            "argument": {"name": "name", "value": "al"}
        });
        let response = server
            .handle_value(&session, request("completion/complete", params, 6))
            .await
            .expect("complete responds");
        let result = result_of(response);
        assert_eq!(result["completion"]["values"], json!([]));
    }
}

mod masking {
    use super::*;

    #[tokio::test]
    async fn mask_error_details_redacts_data() {
        let mut settings = ServerSettings::default();
        settings.mask_error_details = true;
        let options = ServerOptions::from_settings(&settings, "test-server", "1.0.0");
        let registry = ToolRegistry::new();
        let server = Arc::new(
            McpServer::new(options, &settings, Arc::new(registry)).expect("server builds"),
        );
        let (session, _rx) = open_session(&server).await;

        let params = json!({
            "protocolVersion": "1999-01-01",
            "capabilities": {},
            "clientInfo": {"name": "c", "version": "0"}
        });
        let response = server
            .handle_value(&session, request("initialize", params, 1))
            .await
            .expect("error response");

        if let JsonRpcMessage::ErrorResponse(resp) = response {
            assert!(resp.error.data.is_none(), "data must be redacted");
        } else {
            panic!("Expected error response");
        }
    }
}
