//! MCP Notification Manager
//!
//! Process-wide component for one-way server-to-client messages. Applies
//! per-key debouncing (last write wins), per-session token-bucket rate
//! limiting, and fan-out to every ready session whose negotiated
//! capabilities admit the method. Delivery failures are infrastructure
//! errors: they close the session and are never surfaced to callers.

use crate::mcp::protocol::*;
use crate::mcp::session::{Session, SessionRegistry, SessionState};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outbound notification with delivery directives
#[derive(Debug, Clone)]
pub struct NotificationEnvelope {
    pub method: String,
    pub params: Option<Value>,
    /// Notifications sharing a key coalesce within the debounce window
    pub key: Option<String>,
    pub debounce_ms: Option<u64>,
    /// Absent target fans out to every admitting ready session
    pub target_session: Option<String>,
}

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_minute: u32) -> Self {
        let capacity = f64::from(per_minute);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct PendingEntry {
    payload: JsonRpcNotification,
    timer: JoinHandle<()>,
}

struct SessionNotifyState {
    bucket: TokenBucket,
    pending: HashMap<String, PendingEntry>,
    last_drop_warning: Option<Instant>,
}

impl SessionNotifyState {
    fn new(per_minute: u32) -> Self {
        Self {
            bucket: TokenBucket::new(per_minute),
            pending: HashMap::new(),
            last_drop_warning: None,
        }
    }
}

/// Process-wide notification manager
pub struct NotificationManager {
    sessions: SessionRegistry,
    rate_limit_per_minute: u32,
    default_debounce_ms: u64,
    max_queued: usize,
    state: Mutex<HashMap<String, Arc<Mutex<SessionNotifyState>>>>,
    dropped: AtomicU64,
}

impl NotificationManager {
    /// Create a manager over the given session registry
    pub fn new(
        sessions: SessionRegistry,
        rate_limit_per_minute: u32,
        default_debounce_ms: u64,
        max_queued: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            rate_limit_per_minute,
            default_debounce_ms,
            max_queued,
            state: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        })
    }

    /// Notifications dropped by rate limiting or queue overflow
    #[inline]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Emit a notification according to its envelope directives
    pub async fn emit(self: &Arc<Self>, envelope: NotificationEnvelope) {
        let notification =
            JsonRpcNotification::new(envelope.method.clone(), envelope.params.clone());

        let targets: Vec<Arc<Session>> = match &envelope.target_session {
            Some(id) => match self.sessions.get(id).await {
                Some(session) => vec![session],
                None => {
                    debug!(session = %id, method = %envelope.method, "target session not registered");
                    return;
                }
            },
            None => {
                let mut out = Vec::new();
                for session in self.sessions.all().await {
                    if session.state().await == SessionState::Ready
                        && session.admits_notification(&envelope.method).await
                    {
                        out.push(session);
                    }
                }
                out
            }
        };

        for session in targets {
            match &envelope.key {
                Some(key) => {
                    let debounce_ms = envelope.debounce_ms.unwrap_or(self.default_debounce_ms);
                    if debounce_ms == 0 {
                        self.send_now(&session, notification.clone()).await;
                    } else {
                        self.debounce(session, key.clone(), notification.clone(), debounce_ms)
                            .await;
                    }
                }
                None => {
                    self.send_now(&session, notification.clone()).await;
                }
            }
        }
    }

    /// Queue a keyed notification, replacing any pending payload for the key.
    async fn debounce(
        self: &Arc<Self>,
        session: Arc<Session>,
        key: String,
        payload: JsonRpcNotification,
        debounce_ms: u64,
    ) {
        let state = self.session_state(session.id()).await;
        let mut guard = state.lock().await;

        if let Some(previous) = guard.pending.remove(&key) {
            previous.timer.abort();
        } else if guard.pending.len() >= self.max_queued {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                session = %session.id(),
                key = %key,
                "notification queue full; dropping"
            );
            return;
        }

        let manager = Arc::clone(self);
        let timer_session = Arc::clone(&session);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(debounce_ms)).await;
            let entry = {
                let state = manager.session_state(timer_session.id()).await;
                let mut guard = state.lock().await;
                guard.pending.remove(&timer_key)
            };
            if let Some(entry) = entry {
                manager.send_now(&timer_session, entry.payload).await;
            }
        });

        guard.pending.insert(key, PendingEntry { payload, timer });
    }

    /// Rate-check and write a notification to one session.
    async fn send_now(self: &Arc<Self>, session: &Arc<Session>, payload: JsonRpcNotification) {
        let state = self.session_state(session.id()).await;
        {
            let mut guard = state.lock().await;
            if !guard.bucket.try_acquire() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let warn_due = guard
                    .last_drop_warning
                    .map_or(true, |at| at.elapsed() >= Duration::from_secs(60));
                if warn_due {
                    guard.last_drop_warning = Some(Instant::now());
                    warn!(
                        session = %session.id(),
                        method = %payload.method,
                        "notification rate limit exceeded; dropping"
                    );
                }
                return;
            }
        }

        let message = JsonRpcMessage::Notification(payload);
        if let Err(e) = session.send(&message).await {
            warn!(session = %session.id(), error = %e, "notification write failed; closing session");
            self.forget_session(session.id()).await;
            self.sessions.remove(session.id()).await;
        }
    }

    async fn session_state(&self, session_id: &str) -> Arc<Mutex<SessionNotifyState>> {
        let mut state = self.state.lock().await;
        Arc::clone(
            state
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(SessionNotifyState::new(self.rate_limit_per_minute)))
                }),
        )
    }

    /// Drop rate-limit and debounce state for a departed session
    pub async fn forget_session(&self, session_id: &str) {
        let removed = self.state.lock().await.remove(session_id);
        if let Some(state) = removed {
            let mut guard = state.lock().await;
            for (_, entry) in guard.pending.drain() {
                entry.timer.abort();
            }
        }
    }

    /// Flush or drop pending debounce timers at shutdown.
    ///
    /// With `flush` set the latest payloads are delivered best-effort;
    /// otherwise they are discarded.
    pub async fn shutdown(self: &Arc<Self>, flush: bool) {
        let all: Vec<(String, Arc<Mutex<SessionNotifyState>>)> =
            self.state.lock().await.drain().collect();

        for (session_id, state) in all {
            let entries: Vec<(String, PendingEntry)> = {
                let mut guard = state.lock().await;
                guard.pending.drain().collect()
            };
            for (_, entry) in entries {
                entry.timer.abort();
                if flush {
                    if let Some(session) = self.sessions.get(&session_id).await {
                        let message = JsonRpcMessage::Notification(entry.payload);
                        let _ = session.send(&message).await;
                    }
                }
            }
        }
    }

    // Convenience emitters for the notification methods the server produces.

    /// `notifications/progress`, debounced per progress token
    pub async fn notify_progress(
        self: &Arc<Self>,
        session_id: &str,
        params: ProgressParams,
        debounce_ms: Option<u64>,
    ) {
        let key = format!("progress:{}", params.progress_token);
        self.emit(NotificationEnvelope {
            method: "notifications/progress".to_string(),
            params: serde_json::to_value(params).ok(),
            key: Some(key),
            debounce_ms,
            target_session: Some(session_id.to_string()),
        })
        .await;
    }

    /// `notifications/message`, sent immediately (log messages never debounce)
    pub async fn notify_message(
        self: &Arc<Self>,
        session_id: Option<&str>,
        params: LoggingMessageParams,
    ) {
        self.emit(NotificationEnvelope {
            method: "notifications/message".to_string(),
            params: serde_json::to_value(params).ok(),
            key: None,
            debounce_ms: None,
            target_session: session_id.map(str::to_string),
        })
        .await;
    }

    /// `notifications/resources/updated`, debounced per URI
    pub async fn notify_resource_updated(self: &Arc<Self>, uri: &str) {
        self.emit(NotificationEnvelope {
            method: "notifications/resources/updated".to_string(),
            params: Some(serde_json::json!({ "uri": uri })),
            key: Some(format!("resources/updated:{}", uri)),
            debounce_ms: None,
            target_session: None,
        })
        .await;
    }

    /// `notifications/resources/list_changed`
    pub async fn notify_resource_list_changed(self: &Arc<Self>) {
        self.emit(NotificationEnvelope {
            method: "notifications/resources/list_changed".to_string(),
            params: None,
            key: Some("resources/list_changed".to_string()),
            debounce_ms: None,
            target_session: None,
        })
        .await;
    }

    /// `notifications/tools/list_changed`
    pub async fn notify_tool_list_changed(self: &Arc<Self>) {
        self.emit(NotificationEnvelope {
            method: "notifications/tools/list_changed".to_string(),
            params: None,
            key: Some("tools/list_changed".to_string()),
            debounce_ms: None,
            target_session: None,
        })
        .await;
    }

    /// `notifications/prompts/list_changed`
    pub async fn notify_prompt_list_changed(self: &Arc<Self>) {
        self.emit(NotificationEnvelope {
            method: "notifications/prompts/list_changed".to_string(),
            params: None,
            key: Some("prompts/list_changed".to_string()),
            debounce_ms: None,
            target_session: None,
        })
        .await;
    }
}
