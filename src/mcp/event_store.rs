//! SSE Event Store
//!
//! Resumability support for the SSE transport. Every server-to-client
//! message written to a stream is recorded with a monotonically increasing
//! event id; a reconnecting client presents `Last-Event-ID` and receives
//! everything newer, in order, before live delivery resumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// A single recorded server-to-client event
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub stream_id: String,
    pub seq: u64,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Wire representation of the event id
    #[inline]
    pub fn event_id(&self) -> String {
        self.seq.to_string()
    }
}

/// Outcome of a replay request
#[derive(Debug)]
pub enum Replay {
    /// Events newer than the presented id, in order (possibly empty)
    Events(Vec<EventRecord>),
    /// The id fell outside the retention window; the stream cannot resume
    OutOfRetention,
}

/// Pluggable storage for stream events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a message to the stream and return its assigned sequence number
    async fn append(&self, stream_id: &str, payload: Value) -> u64;

    /// Return events with seq strictly greater than `last_event_id`
    async fn replay_after(&self, stream_id: &str, last_event_id: u64) -> Replay;

    /// Highest sequence number recorded for the stream, if any
    async fn tail_id(&self, stream_id: &str) -> Option<u64>;

    /// Drop the stream and all stored events
    async fn remove_stream(&self, stream_id: &str);
}

struct StreamEvents {
    counter: u64,
    events: VecDeque<EventRecord>,
}

/// Bounded in-memory ring, the default store.
///
/// Retention is `capacity` events per stream; older events are evicted and
/// become unreplayable.
pub struct InMemoryEventStore {
    capacity: usize,
    streams: Mutex<HashMap<String, StreamEvents>>,
}

impl InMemoryEventStore {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            streams: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, stream_id: &str, payload: Value) -> u64 {
        let mut streams = self.streams.lock().await;
        let stream = streams
            .entry(stream_id.to_string())
            .or_insert_with(|| StreamEvents {
                counter: 0,
                events: VecDeque::new(),
            });

        stream.counter += 1;
        let seq = stream.counter;
        stream.events.push_back(EventRecord {
            stream_id: stream_id.to_string(),
            seq,
            payload,
            created_at: Utc::now(),
        });
        while stream.events.len() > self.capacity {
            stream.events.pop_front();
        }
        seq
    }

    async fn replay_after(&self, stream_id: &str, last_event_id: u64) -> Replay {
        let streams = self.streams.lock().await;
        let Some(stream) = streams.get(stream_id) else {
            return Replay::OutOfRetention;
        };

        let oldest = stream.events.front().map(|e| e.seq);
        match oldest {
            None => {
                // The stream exists but holds nothing; resumable only if the
                // client is already at the tail.
                if last_event_id >= stream.counter {
                    Replay::Events(Vec::new())
                } else {
                    Replay::OutOfRetention
                }
            }
            Some(first_retained) => {
                if last_event_id + 1 < first_retained {
                    return Replay::OutOfRetention;
                }
                let events = stream
                    .events
                    .iter()
                    .filter(|e| e.seq > last_event_id)
                    .cloned()
                    .collect();
                Replay::Events(events)
            }
        }
    }

    async fn tail_id(&self, stream_id: &str) -> Option<u64> {
        let streams = self.streams.lock().await;
        streams.get(stream_id).map(|s| s.counter).filter(|c| *c > 0)
    }

    async fn remove_stream(&self, stream_id: &str) {
        self.streams.lock().await.remove(stream_id);
    }
}
