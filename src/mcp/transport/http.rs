//! HTTP Streaming Transport
//!
//! Single endpoint at `POST /mcp`: one JSON-RPC object in, one JSON
//! response out (202 for notifications). The `mcp-session-id` header binds
//! requests to sessions; it is minted on the first `initialize` and echoed
//! back. Sessions on this transport have no server-to-client stream, so
//! fanned-out notifications are discarded.

use crate::config::ServerSettings;
use crate::mcp::protocol::*;
use crate::mcp::server::McpServer;
use crate::mcp::session::{DiscardSink, SessionState};
use anyhow::Result;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::HeaderName};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

pub(crate) const SESSION_HEADER: &str = "mcp-session-id";
pub(crate) const PROTOCOL_HEADER: &str = "mcp-protocol-version";

#[derive(Clone)]
struct HttpState {
    server: Arc<McpServer>,
}

/// Build the single-shot HTTP router
pub fn router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/mcp", post(handle_post))
        .with_state(HttpState { server })
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the single-shot HTTP transport
pub async fn serve_http(server: Arc<McpServer>, settings: &ServerSettings) -> Result<()> {
    let (host, port) = settings.bind_addr();
    let listener = TcpListener::bind((host.as_str(), port)).await?;
    info!("Starting MCP server with HTTP transport on {}:{}", host, port);
    axum::serve(listener, router(server)).await?;
    Ok(())
}

/// Reject requests whose `mcp-protocol-version` is not the server's
/// latest version.
///
/// An absent header is tolerated and treated as the latest version.
pub(crate) fn check_protocol_header(headers: &HeaderMap) -> Result<(), Response> {
    let Some(value) = headers.get(PROTOCOL_HEADER) else {
        return Ok(());
    };
    let version = value.to_str().unwrap_or_default();
    if version != MCP_VERSION {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            format!("Unsupported protocol version: {}", version),
        ));
    }
    Ok(())
}

pub(crate) fn error_body(status: StatusCode, message: String) -> Response {
    (
        status,
        axum::Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = session_id.parse() {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    response
}

async fn handle_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = check_protocol_header(&headers) {
        return response;
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            let error = JsonRpcErrorResponse::new(
                JsonRpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {}", e), None),
                None,
            );
            return (StatusCode::BAD_REQUEST, axum::Json(error)).into_response();
        }
    };

    let header_session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let method = value.get("method").and_then(Value::as_str).unwrap_or_default();
    let is_initialize = method == "initialize";
    let is_notification = value.get("id").is_none() && !method.is_empty();

    let (session, minted) = match header_session {
        Some(id) => match state.server.sessions().get(&id).await {
            Some(session) => {
                if is_initialize && session.state().await != SessionState::Pending {
                    warn!(session = %id, "duplicate initialize rejected");
                    let error = JsonRpcErrorResponse::new(
                        JsonRpcError::invalid_request(),
                        value
                            .get("id")
                            .and_then(|id| serde_json::from_value(id.clone()).ok()),
                    );
                    let response = (StatusCode::CONFLICT, axum::Json(error)).into_response();
                    return with_session_header(response, &id);
                }
                (session, false)
            }
            None => {
                return error_body(StatusCode::NOT_FOUND, "Unknown session".to_string());
            }
        },
        None => {
            if !is_initialize {
                return error_body(StatusCode::NOT_FOUND, "Unknown session".to_string());
            }
            let id = Uuid::new_v4().to_string();
            let session = state
                .server
                .open_session(id, Arc::new(DiscardSink))
                .await;
            (session, true)
        }
    };

    if minted {
        info!(session = %session.id(), "minted session for initialize");
    }

    let response = state.server.handle_value(&session, value).await;

    let http_response = match response {
        Some(message) => (StatusCode::OK, axum::Json(message)).into_response(),
        None if is_notification => StatusCode::ACCEPTED.into_response(),
        None => StatusCode::OK.into_response(),
    };
    with_session_header(http_response, session.id())
}
