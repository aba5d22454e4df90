//! Server-Initiated Request Manager
//!
//! Lets the server issue typed JSON-RPC requests to the client and await the
//! client's response. Pending requests are tracked in an id-keyed table of
//! resolvable futures; timed-out ids are tombstoned so a late reply is
//! ignored rather than mis-routed.

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use crate::mcp::session::MessageSink;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;
use uuid::Uuid;

/// Methods the server may originate toward the client.
pub const SERVER_TO_CLIENT_METHODS: &[&str] = &[
    "sampling/createMessage",
    "roots/list",
    "elicitation/create",
    "completion/complete",
];

const MAX_TOMBSTONES: usize = 256;

#[derive(Default)]
struct TombstoneSet {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl TombstoneSet {
    fn insert(&mut self, id: String) {
        if self.ids.insert(id.clone()) {
            self.order.push_back(id);
            while self.order.len() > MAX_TOMBSTONES {
                if let Some(old) = self.order.pop_front() {
                    self.ids.remove(&old);
                }
            }
        }
    }

    fn take(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            self.order.retain(|x| x != id);
            true
        } else {
            false
        }
    }
}

/// Manages server-initiated JSON-RPC requests and correlates client responses
pub struct RequestManager {
    sink: Arc<dyn MessageSink>,
    default_timeout: Duration,
    pending: Mutex<HashMap<String, oneshot::Sender<McpResult<Value>>>>,
    tombstones: Mutex<TombstoneSet>,
}

impl RequestManager {
    /// Create a manager writing requests through the given sink
    pub fn new(sink: Arc<dyn MessageSink>, default_timeout: Duration) -> Self {
        Self {
            sink,
            default_timeout,
            pending: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(TombstoneSet::default()),
        }
    }

    /// Send a request to the client and await its response.
    ///
    /// Methods outside [`SERVER_TO_CLIENT_METHODS`] fail immediately.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        if !SERVER_TO_CLIENT_METHODS.contains(&method) {
            return Err(McpError::InvalidRequest {
                message: format!("method {} cannot be sent to the client", method),
            });
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let request = JsonRpcRequest::new(
            method.to_string(),
            params,
            RequestId::String(id.clone()),
        );
        let payload = serde_json::to_value(&request).map_err(|e| McpError::Internal {
            message: e.to_string(),
        })?;

        if self.sink.send(payload).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::SessionClosed);
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::SessionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                self.tombstones.lock().await.insert(id);
                Err(McpError::Timeout)
            }
        }
    }

    /// Resolve a pending request from a client success response
    pub async fn resolve(&self, id: &RequestId, result: Value) {
        self.complete(id, Ok(result)).await;
    }

    /// Reject a pending request from a client error response
    pub async fn reject(&self, id: &RequestId, error: JsonRpcError) {
        self.complete(
            id,
            Err(McpError::ClientResponse {
                code: error.code,
                message: error.message,
            }),
        )
        .await;
    }

    async fn complete(&self, id: &RequestId, outcome: McpResult<Value>) {
        let key = id.to_string();
        let sender = self.pending.lock().await.remove(&key);
        match sender {
            Some(tx) => {
                // Receiver may have been dropped between timeout and now.
                let _ = tx.send(outcome);
            }
            None => {
                if self.tombstones.lock().await.take(&key) {
                    debug!(id = %key, "ignoring late reply to timed-out request");
                } else {
                    debug!(id = %key, "response does not match any pending request");
                }
            }
        }
    }

    /// Fail every outstanding request; called when the session closes
    pub async fn fail_all(&self, error: McpError) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Number of requests awaiting a client response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
