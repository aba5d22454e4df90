//! SSE Transport with Resumability
//!
//! `GET /mcp` opens the server-to-client event stream; `POST /mcp` carries
//! client-to-server messages, with responses delivered over the stream.
//! Every stream message is recorded in the event store with a monotonic
//! event id; a reconnecting client presents `Last-Event-ID` and receives
//! everything newer before live delivery resumes. Ids that fell out of
//! retention produce a fresh stream and an explicit replay-error signal.

use crate::config::ServerSettings;
use crate::mcp::event_store::{EventStore, InMemoryEventStore, Replay};
use crate::mcp::server::McpServer;
use crate::mcp::session::{MessageSink, Session};
use crate::mcp::transport::http::{SESSION_HEADER, check_protocol_header, error_body};
use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header::HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LIVE_CHANNEL_CAPACITY: usize = 256;

/// Seconds between keep-alive comments on an idle stream
const KEEP_ALIVE_SECS: u64 = 15;

/// Sink that records every message in the event store and forwards it to
/// the currently attached live stream, if any.
///
/// A detached or lagging stream is not an error: the store retains the
/// message for replay, which is what resumability depends on.
pub struct SseSink {
    stream_id: String,
    events: Arc<dyn EventStore>,
    live: RwLock<Option<mpsc::Sender<(u64, Value)>>>,
}

impl SseSink {
    fn new(stream_id: String, events: Arc<dyn EventStore>) -> Self {
        Self {
            stream_id,
            events,
            live: RwLock::new(None),
        }
    }

    /// Attach a fresh live channel, replacing any previous one
    async fn attach(&self, tx: mpsc::Sender<(u64, Value)>) {
        *self.live.write().await = Some(tx);
    }
}

#[async_trait]
impl MessageSink for SseSink {
    async fn send(&self, message: Value) -> Result<()> {
        let seq = self.events.append(&self.stream_id, message.clone()).await;

        let sender = self.live.read().await.clone();
        if let Some(tx) = sender {
            if tx.try_send((seq, message)).is_err() {
                debug!(stream = %self.stream_id, "live stream detached; event retained for replay");
                *self.live.write().await = None;
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
struct SseState {
    server: Arc<McpServer>,
    events: Arc<dyn EventStore>,
    sinks: Arc<Mutex<HashMap<String, Arc<SseSink>>>>,
    keep_alive: Duration,
}

impl SseState {
    async fn open_session(&self) -> (Arc<Session>, Arc<SseSink>) {
        let id = Uuid::new_v4().to_string();
        let sink = Arc::new(SseSink::new(id.clone(), Arc::clone(&self.events)));
        let session = self
            .server
            .open_session(id.clone(), Arc::clone(&sink) as Arc<dyn MessageSink>)
            .await;
        self.sinks.lock().await.insert(id, Arc::clone(&sink));
        (session, sink)
    }
}

/// Build the SSE router
pub fn router(server: Arc<McpServer>, events: Arc<dyn EventStore>) -> Router {
    Router::new()
        .route("/mcp", get(handle_get).post(handle_post))
        .with_state(SseState {
            server,
            events,
            sinks: Arc::new(Mutex::new(HashMap::new())),
            keep_alive: Duration::from_secs(KEEP_ALIVE_SECS),
        })
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the SSE transport with an in-memory event store
pub async fn serve_sse(server: Arc<McpServer>, settings: &ServerSettings) -> Result<()> {
    let events: Arc<dyn EventStore> =
        Arc::new(InMemoryEventStore::new(settings.event_store_capacity));
    let (host, port) = settings.bind_addr();
    let listener = TcpListener::bind((host.as_str(), port)).await?;
    info!("Starting MCP server with SSE transport on {}:{}", host, port);
    axum::serve(listener, router(server, events)).await?;
    Ok(())
}

async fn handle_post(
    State(state): State<SseState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = check_protocol_header(&headers) {
        return response;
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return error_body(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e));
        }
    };

    let method = value.get("method").and_then(Value::as_str).unwrap_or_default();
    let is_notification = value.get("id").is_none() && !method.is_empty();

    let session = if method == "initialize" {
        let (session, _sink) = state.open_session().await;
        info!(session = %session.id(), "minted SSE session for initialize");
        session
    } else {
        let Some(id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
            return error_body(StatusCode::NOT_FOUND, "Unknown session".to_string());
        };
        match state.server.sessions().get(id).await {
            Some(session) => session,
            None => {
                return error_body(StatusCode::NOT_FOUND, "Unknown session".to_string());
            }
        }
    };

    // Responses travel over the event stream, not the POST body.
    if let Some(response) = state.server.handle_value(&session, value).await {
        match serde_json::to_value(&response) {
            Ok(value) => {
                if let Err(e) = session.send_raw(value).await {
                    warn!(session = %session.id(), error = %e, "failed to queue response");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize response"),
        }
    }

    let status = if is_notification {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    let mut response = (status, axum::Json(serde_json::json!({ "status": "ok" }))).into_response();
    if let Ok(header) = HeaderValue::from_str(session.id()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), header);
    }
    response
}

async fn handle_get(State(state): State<SseState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_protocol_header(&headers) {
        return response;
    }

    let last_event_id: Option<u64> = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let requested = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let existing = match &requested {
        Some(id) => {
            let sink = state.sinks.lock().await.get(id).cloned();
            match sink {
                Some(sink) => Some((id.clone(), sink)),
                None => {
                    return error_body(StatusCode::NOT_FOUND, "Unknown session".to_string());
                }
            }
        }
        None => None,
    };

    let mut head: Vec<Result<Event, Infallible>> = Vec::new();
    let (session_id, sink, floor) = match existing {
        None => {
            // A connection with no session yet: mint one, nothing to replay.
            let (session, sink) = state.open_session().await;
            let id = session.id().to_string();
            head.push(Ok(session_event(&id)));
            (id, sink, 0)
        }
        Some((id, sink)) => {
            // Replay anything newer than the presented id; an id outside
            // retention means the stream cannot resume, so a fresh one is
            // minted and the client is told explicitly.
            let floor = last_event_id.unwrap_or(0);
            match state.events.replay_after(&id, floor).await {
                Replay::Events(records) => {
                    head.push(Ok(session_event(&id)));
                    let mut tail = floor;
                    for record in records {
                        tail = tail.max(record.seq);
                        head.push(Ok(Event::default()
                            .id(record.event_id())
                            .data(record.payload.to_string())));
                    }
                    (id, sink, tail)
                }
                Replay::OutOfRetention => {
                    let (fresh, fresh_sink) = state.open_session().await;
                    let fresh_id = fresh.id().to_string();
                    warn!(
                        stream = %id,
                        fresh = %fresh_id,
                        "replay window exceeded; issuing fresh stream"
                    );
                    head.push(Ok(Event::default()
                        .event("replay-error")
                        .data(
                            serde_json::json!({
                                "message": "events expired; resuming from a new stream"
                            })
                            .to_string(),
                        )));
                    head.push(Ok(session_event(&fresh_id)));
                    (fresh_id, fresh_sink, 0)
                }
            }
        }
    };

    let (tx, rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
    sink.attach(tx).await;

    let live = ReceiverStream::new(rx).filter_map(move |(seq, value): (u64, Value)| {
        // Events already covered by replay are skipped.
        futures::future::ready((seq > floor).then(|| {
            Ok::<Event, Infallible>(Event::default().id(seq.to_string()).data(value.to_string()))
        }))
    });

    let stream = futures::stream::iter(head).chain(live);
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive));

    let mut response = sse.into_response();
    if let Ok(header) = HeaderValue::from_str(&session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), header);
    }
    response
}

fn session_event(session_id: &str) -> Event {
    Event::default()
        .event("session")
        .data(serde_json::json!({ "sessionId": session_id }).to_string())
}
