//! MCP Server Integration Tests
//!
//! End-to-end scenarios driven through the dispatcher the way a transport
//! would: lifecycle handshakes, tool calls with progress, notification
//! debouncing and rate limiting, and SSE replay semantics.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use toolhost_mcp::config::ServerSettings;
use toolhost_mcp::mcp::context::ToolContext;
use toolhost_mcp::mcp::event_store::{EventStore, InMemoryEventStore, Replay};
use toolhost_mcp::mcp::protocol::*;
use toolhost_mcp::mcp::server::{McpServer, ServerOptions};
use toolhost_mcp::mcp::session::{ChannelSink, MessageSink, Session};
use toolhost_mcp::mcp::tools::{ToolHandler, ToolOutput, ToolRegistry};

/// Echo tool emitting one progress update per item
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

/// Tool that logs at several levels
struct ChattyHandler;

#[async_trait]
impl ToolHandler for ChattyHandler {
    async fn call(
        &self,
        ctx: &ToolContext,
        _arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<ToolOutput> {
        ctx.debug("noise").await;
        ctx.info("routine").await;
        ctx.error("trouble").await;
        Ok(ToolOutput::text("logged"))
    }
}

fn echo_tool() -> Tool {
    Tool {
        name: "echo".to_string(),
        description: Some("Echo items back with progress".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["items"]
        }),
        output_schema: None,
        annotations: None,
        requires_auth: false,
        requires_secrets: Vec::new(),
    }
}

async fn setup_server(settings: ServerSettings) -> Arc<McpServer> {
    let registry = ToolRegistry::new();
    registry
        .register(echo_tool(), EchoHandler)
        .await
        .expect("echo registers");
    registry
        .register(
            Tool {
                name: "chatty".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
                output_schema: None,
                annotations: None,
                requires_auth: false,
                requires_secrets: Vec::new(),
            },
            ChattyHandler,
        )
        .await
        .expect("chatty registers");

    let options = ServerOptions::from_settings(&settings, "toolhost-test", "0.1.0");
    Arc::new(McpServer::new(options, &settings, Arc::new(registry)).expect("server builds"))
}

async fn connect(server: &Arc<McpServer>, id: &str) -> (Arc<Session>, mpsc::Receiver<Value>) {
    let (tx, rx) = mpsc::channel(512);
    let session = server
        .open_session(id, Arc::new(ChannelSink::new(tx)) as Arc<dyn MessageSink>)
        .await;
    (session, rx)
}

fn request(method: &str, params: Value, id: i64) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "params": params, "id": id})
}

async fn initialize(server: &Arc<McpServer>, session: &Arc<Session>) -> Value {
    let params = json!({
        "protocolVersion": MCP_VERSION,
        "capabilities": {},
        "clientInfo": {"name": "integration-client", "version": "1.0.0"}
    });
    let response = server
        .handle_value(session, request("initialize", params, 1))
        .await
        .expect("initialize responds");
    let JsonRpcMessage::Response(response) = response else {
        panic!("Expected initialize response, got {:?}", response);
    };

    server
        .handle_value(
            session,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;
    response.result
}

/// Scenario: initialize, initialized, ping
#[tokio::test]
async fn lifecycle_handshake_and_ping() {
    let server = setup_server(ServerSettings::default()).await;
    let (session, _rx) = connect(&server, "it-lifecycle").await;

    let result = initialize(&server, &session).await;
    assert_eq!(result["protocolVersion"], MCP_VERSION);
    assert_eq!(result["serverInfo"]["name"], "toolhost-test");

    let response = server
        .handle_value(&session, request("ping", json!({}), 2))
        .await
        .expect("ping responds");
    if let JsonRpcMessage::Response(resp) = response {
        assert_eq!(resp.result, json!({}));
        assert_eq!(resp.id, RequestId::Number(2));
    } else {
        panic!("Expected ping response");
    }
}

/// Scenario: tools/list before initialize yields the lifecycle error
#[tokio::test]
async fn lifecycle_violation_is_rejected() {
    let server = setup_server(ServerSettings::default()).await;
    let (session, _rx) = connect(&server, "it-violation").await;

    let response = server
        .handle_value(&session, request("tools/list", json!({}), 1))
        .await
        .expect("error responds");
    if let JsonRpcMessage::ErrorResponse(resp) = response {
        assert_eq!(resp.error.code, -32002);
    } else {
        panic!("Expected lifecycle error");
    }
}

/// Scenario: echo tool call with progress token p1
#[tokio::test]
async fn tool_call_with_progress_notifications() {
    let mut settings = ServerSettings::default();
    settings.default_debounce_ms = 0;
    let server = setup_server(settings).await;
    let (session, mut rx) = connect(&server, "it-progress").await;
    initialize(&server, &session).await;

    let params = json!({
        "name": "echo",
        "arguments": {"items": ["a", "b", "c"]},
        "_meta": {"progressToken": "p1"}
    });
    let response = server
        .handle_value(&session, request("tools/call", params, 3))
        .await
        .expect("call responds");

    let JsonRpcMessage::Response(response) = response else {
        panic!("Expected call response");
    };
    assert_eq!(response.result["isError"], false);
    let texts: Vec<&str> = response.result["content"]
        .as_array()
        .expect("content")
        .iter()
        .map(|c| c["text"].as_str().expect("text"))
        .collect();
    assert_eq!(texts, vec!["a", "b", "c"]);

    let mut progress = Vec::new();
    while let Ok(Some(n)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        if n["method"] == "notifications/progress" {
            assert_eq!(n["params"]["progressToken"], "p1");
            progress.push(n["params"]["progress"].as_f64().expect("progress"));
        }
    }
    assert_eq!(progress, vec![1.0, 2.0, 3.0]);
}

/// Scenario: 10 resource updates for one URI coalesce to a single delivery,
/// fanned out only to ready sessions
#[tokio::test]
async fn debounced_resource_updates_coalesce() {
    let server = setup_server(ServerSettings::default()).await;
    let (_pending, mut pending_rx) = connect(&server, "it-debounce-pending").await;
    let (ready, mut ready_rx) = connect(&server, "it-debounce-ready").await;
    initialize(&server, &ready).await;

    for i in 0..10 {
        server
            .notifications()
            .emit(toolhost_mcp::mcp::notifications::NotificationEnvelope {
                method: "notifications/resources/updated".to_string(),
                params: Some(json!({"uri": "file:///doc", "rev": i})),
                key: Some("resources/updated:file:///doc".to_string()),
                debounce_ms: Some(100),
                target_session: None,
            })
            .await;
    }

    let delivered = tokio::time::timeout(Duration::from_millis(500), ready_rx.recv())
        .await
        .expect("delivered within the window")
        .expect("notification");
    assert_eq!(delivered["params"]["rev"], 9, "last payload wins");

    assert!(
        tokio::time::timeout(Duration::from_millis(150), ready_rx.recv())
            .await
            .is_err(),
        "exactly one delivery"
    );

    // The session that never finished its handshake saw nothing.
    assert!(
        tokio::time::timeout(Duration::from_millis(50), pending_rx.recv())
            .await
            .is_err()
    );
}

/// Scenario: sustained over-limit emission is throttled without errors
#[tokio::test]
async fn rate_limit_bounds_delivery() {
    let server = setup_server(ServerSettings::default()).await;
    let (session, mut rx) = connect(&server, "it-rate").await;
    initialize(&server, &session).await;

    for i in 0..120 {
        server
            .notifications()
            .notify_message(
                Some(session.id()),
                LoggingMessageParams {
                    level: LogLevel::Info,
                    logger: None,
                    data: json!(i),
                },
            )
            .await;
    }

    let mut delivered = 0;
    while tokio::time::timeout(Duration::from_millis(50), rx.recv())
        .await
        .ok()
        .flatten()
        .is_some()
    {
        delivered += 1;
    }

    assert!(
        (55..=65).contains(&delivered),
        "delivered {} outside the budget",
        delivered
    );
    assert_eq!(
        server.notifications().dropped_count(),
        (120 - delivered) as u64
    );
}

/// Scenario: session log floor suppresses below-threshold tool logs
#[tokio::test]
async fn log_floor_filters_tool_messages() {
    let mut settings = ServerSettings::default();
    settings.default_debounce_ms = 0;
    let server = setup_server(settings).await;
    let (session, mut rx) = connect(&server, "it-logs").await;
    initialize(&server, &session).await;

    server
        .handle_value(
            &session,
            request("logging/setLevel", json!({"level": "error"}), 2),
        )
        .await
        .expect("setLevel responds");

    server
        .handle_value(
            &session,
            request("tools/call", json!({"name": "chatty", "arguments": {}}), 3),
        )
        .await
        .expect("call responds");

    let mut levels = Vec::new();
    while let Ok(Some(n)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        if n["method"] == "notifications/message" {
            levels.push(n["params"]["level"].as_str().expect("level").to_string());
        }
    }
    assert_eq!(levels, vec!["error"], "debug and info are below the floor");
}

/// Scenario: SSE replay after Last-Event-ID: 3 yields exactly events 4 and 5
#[tokio::test]
async fn sse_replay_resumes_after_last_event_id() {
    let store = InMemoryEventStore::new(1024);

    for n in 1..=5u64 {
        let seq = store
            .append("stream-1", json!({"event": n}))
            .await;
        assert_eq!(seq, n, "ids are contiguous from 1");
    }

    match store.replay_after("stream-1", 3).await {
        Replay::Events(events) => {
            let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
            assert_eq!(seqs, vec![4, 5]);
            assert_eq!(events[0].payload, json!({"event": 4}));
        }
        Replay::OutOfRetention => panic!("replay should be possible"),
    }

    // Replay beyond retention signals a fresh stream is needed.
    let small = InMemoryEventStore::new(2);
    for n in 1..=5u64 {
        small.append("stream-2", json!({"event": n})).await;
    }
    assert!(matches!(
        small.replay_after("stream-2", 1).await,
        Replay::OutOfRetention
    ));
}

/// Scenario: identical initialize parameters yield identical capabilities
/// on every transport session
#[tokio::test]
async fn initialize_is_transport_invariant() {
    let server = setup_server(ServerSettings::default()).await;

    let (stdio_like, _rx1) = connect(&server, "stdio").await;
    let (http_like, _rx2) = connect(&server, "f6b7c1c2-aaaa-bbbb-cccc-000000000001").await;

    let a = initialize(&server, &stdio_like).await;
    let b = initialize(&server, &http_like).await;

    assert_eq!(a["capabilities"], b["capabilities"]);
    assert_eq!(a["protocolVersion"], b["protocolVersion"]);
    assert_eq!(a["serverInfo"], b["serverInfo"]);
}

/// Scenario: responses correlate by id even when completion order differs
#[tokio::test]
async fn responses_correlate_by_id() {
    let server = setup_server(ServerSettings::default()).await;
    let (session, _rx) = connect(&server, "it-ids").await;
    initialize(&server, &session).await;

    for id in [7, 11, 13] {
        let response = server
            .handle_value(&session, request("ping", json!({}), id))
            .await
            .expect("ping responds");
        if let JsonRpcMessage::Response(resp) = response {
            assert_eq!(resp.id, RequestId::Number(id));
        } else {
            panic!("Expected ping response");
        }
    }
}
