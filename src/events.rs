//! Lifecycle events published to the CLI and any other observer.

use crate::orchestrator::LifecycleState;
use crate::port::Ownership;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default capacity of the event channel. Slow subscribers lag, never block.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What the sequencer was doing when an action event was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Ensure,
    Inspect,
    Reclaim,
    Start,
    Reload,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ServiceRegistered {
        id: String,
        name: String,
        description: String,
        icon: String,
        required: bool,
        port: Option<u16>,
    },
    ServiceAction {
        id: String,
        kind: ActionKind,
        message: String,
    },
    ServiceStatus {
        id: String,
        running: bool,
        pid: Option<u32>,
        port: Option<u16>,
        /// `None` when the port holder could not be determined.
        ownership: Option<Ownership>,
        state: LifecycleState,
        message: String,
    },
}

impl Event {
    pub fn service_id(&self) -> &str {
        match self {
            Event::ServiceRegistered { id, .. }
            | Event::ServiceAction { id, .. }
            | Event::ServiceStatus { id, .. } => id,
        }
    }

    pub fn action(id: &str, kind: ActionKind, message: impl Into<String>) -> Self {
        Event::ServiceAction {
            id: id.to_string(),
            kind,
            message: message.into(),
        }
    }
}

/// Fan-out of [`Event`]s over a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<Event>,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Events with no subscriber are dropped.
    pub fn publish(&self, event: Event) {
        tracing::trace!(?event, "event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let events = EventPublisher::default();
        let mut rx = events.subscribe();
        events.publish(Event::action("web", ActionKind::Start, "starting"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.service_id(), "web");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        EventPublisher::new(4).publish(Event::action("web", ActionKind::Stop, ""));
    }

    #[test]
    fn status_serializes_with_type_tag() {
        let event = Event::ServiceStatus {
            id: "bento".into(),
            running: true,
            pid: Some(10),
            port: Some(4195),
            ownership: Some(Ownership::Free),
            state: LifecycleState::Running,
            message: String::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "service_status");
        assert_eq!(json["ownership"], "free");
        assert_eq!(json["state"], "running");
    }
}
