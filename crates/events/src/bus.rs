//! Fan-out of sync engine activity over `tokio::sync::broadcast`.
//!
//! Publishing never blocks the engine. Observers that fall behind lose the
//! oldest events and see `RecvError::Lagged`; nothing the engine does
//! depends on an event being received.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// SyncEvent
// ---------------------------------------------------------------------------

/// One uplink, downlink or purge outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// One of [`crate::names`].
    pub event_type: String,

    /// Jobs the outcome concerns. Empty when the cycle touched none.
    pub job_ids: Vec<String>,

    /// Counts, error text and similar details; an empty object by default.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            job_ids: Vec::new(),
            payload: serde_json::json!({}),
            timestamp: Utc::now(),
        }
    }

    pub fn with_jobs<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 256;

/// Shared as `Arc<EventBus>` between the engine tasks and observers.
///
/// ```rust
/// use fieldsync_events::{names, EventBus, SyncEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
/// bus.publish(SyncEvent::new(names::UPLINK_PUSHED).with_jobs(["JOB-2"]));
/// assert_eq!(rx.try_recv().unwrap().job_ids, vec!["JOB-2".to_string()]);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per observer before it starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send `event` to every current observer. Returns how many received it.
    pub fn publish(&self, event: SyncEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Observe events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
