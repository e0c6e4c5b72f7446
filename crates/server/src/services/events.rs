//! Typed publish/subscribe event bus (§4.K).
//!
//! Generalizes the ad hoc JSON-string broadcast the teacher used into a
//! typed enum with a dedicated holder, per the "global mutable state →
//! explicit holders" design note. Delivery is best-effort: a slow
//! subscriber is never allowed to back-pressure a publisher — `tokio`'s
//! broadcast channel already drops the oldest buffered message once a
//! receiver falls behind its capacity, which is exactly the "bounded
//! buffer drops oldest" behavior called for.

use serde::Serialize;
use tokio::sync::broadcast;

/// Default per-subscriber buffer; a lagging subscriber drops the oldest
/// `Event`s beyond this depth rather than blocking publishers.
const EVENT_BUFFER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    ProcessStateChange {
        model_id: String,
        state: String,
    },
    TokenMetrics {
        model_id: String,
        prompt_tokens: u64,
        completion_tokens: u64,
    },
    DownloadProgress {
        download_id: String,
        bytes: u64,
        total_bytes: Option<u64>,
    },
    ConfigFileChanged,
    ConfigGenerationProgress {
        step: String,
        progress: f32,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Returns without error even if there are no
    /// subscribers — that is the normal idle state.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::ConfigFileChanged);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::ProcessStateChange {
            model_id: "m1".to_string(),
            state: "Ready".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::ProcessStateChange { .. }));
    }
}
