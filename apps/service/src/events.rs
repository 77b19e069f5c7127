use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Notable state changes, for whoever wants to react to them
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// An endpoint reached the consecutive-failure threshold
    Alert { endpoint_id: i64, url: String, failures: u32, at: DateTime<Utc> },
    /// An endpoint passed again after having alerted
    Recovered { endpoint_id: i64, url: String, failures: u32, at: DateTime<Utc> },
    /// The reaper removed an endpoint whose expiry passed
    EndpointExpired { endpoint_id: i64, url: String, at: DateTime<Utc> },
}

/// Broadcast bus for `MonitorEvent`s; slow subscribers lose old events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: MonitorEvent) {
        debug!(?event, "Publishing monitor event");
        // Ignore errors if there are no receivers
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
