//! Per-service lifecycle state.

use crate::events::{Event, EventPublisher};
use crate::port::Ownership;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of one service within a session.
///
/// ```text
/// pending ──► running ──► stopped
///    │  ▲        │           ▲
///    │  │        ▼           │
///    │ reclaimed ─► error ───┤
///    │                       │
///    └──► blocked ───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Registered, not yet started.
    Pending,
    /// A port is held by something that may not be reclaimed.
    Blocked,
    /// Ensure or start failed, or the process exited unexpectedly.
    Error,
    /// A stale instance was stopped and its port observed free.
    Reclaimed,
    Running,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Pending => write!(f, "pending"),
            LifecycleState::Blocked => write!(f, "blocked"),
            LifecycleState::Error => write!(f, "error"),
            LifecycleState::Reclaimed => write!(f, "reclaimed"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

impl LifecycleState {
    pub fn is_valid_transition(&self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, to) {
            (Pending, Blocked | Error | Reclaimed | Running | Stopped) => true,
            (Reclaimed, Blocked | Error | Running | Stopped) => true,
            (Running, Error | Stopped) => true,
            (Error | Blocked, Stopped) => true,
            (s1, s2) if *s1 == s2 => true,
            _ => false,
        }
    }
}

/// What the session knows about one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRecord {
    pub state: LifecycleState,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    /// Classification of the primary port at inspection time.
    pub ownership: Option<Ownership>,
    pub message: String,
    /// The start hook was invoked, so shutdown must sweep this service.
    pub launched: bool,
}

impl ServiceRecord {
    fn new(port: Option<u16>) -> Self {
        Self {
            state: LifecycleState::Pending,
            pid: None,
            port,
            ownership: None,
            message: String::new(),
            launched: false,
        }
    }
}

/// Shared lifecycle table. Every state change is published as a status event.
#[derive(Clone)]
pub struct LifecycleTable {
    records: Arc<RwLock<HashMap<String, ServiceRecord>>>,
    events: EventPublisher,
}

impl LifecycleTable {
    pub fn new(events: EventPublisher) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn register(&self, id: &str, port: Option<u16>) {
        self.records
            .write()
            .insert(id.to_string(), ServiceRecord::new(port));
    }

    /// Move `id` to `to`. Invalid transitions are logged and ignored.
    pub fn transition(&self, id: &str, to: LifecycleState, message: impl Into<String>) -> bool {
        let record = {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(id) else {
                tracing::warn!("State change for unknown service '{}'", id);
                return false;
            };
            if !record.state.is_valid_transition(to) {
                tracing::warn!(
                    "Ignoring invalid state transition for '{}': {} -> {}",
                    id,
                    record.state,
                    to
                );
                return false;
            }
            tracing::debug!("'{}': {} -> {}", id, record.state, to);
            record.state = to;
            record.message = message.into();
            record.clone()
        };
        self.events.publish(status_event(id, &record));
        true
    }

    /// Record the inspected ownership and publish the current status.
    pub fn observe(&self, id: &str, ownership: Option<Ownership>, message: impl Into<String>) {
        let record = {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(id) else {
                return;
            };
            record.ownership = ownership;
            record.message = message.into();
            record.clone()
        };
        self.events.publish(status_event(id, &record));
    }

    /// Note that the start hook ran; shutdown sweeps launched services only.
    pub fn mark_launched(&self, id: &str) {
        if let Some(record) = self.records.write().get_mut(id) {
            record.launched = true;
        }
    }

    pub fn set_pid(&self, id: &str, pid: u32) {
        if let Some(record) = self.records.write().get_mut(id) {
            record.pid = Some(pid);
        }
    }

    pub fn get(&self, id: &str) -> Option<ServiceRecord> {
        self.records.read().get(id).cloned()
    }

    pub fn state(&self, id: &str) -> Option<LifecycleState> {
        self.records.read().get(id).map(|r| r.state)
    }
}

fn status_event(id: &str, record: &ServiceRecord) -> Event {
    Event::ServiceStatus {
        id: id.to_string(),
        running: record.state == LifecycleState::Running,
        pid: record.pid,
        port: record.port,
        ownership: record.ownership,
        state: record.state,
        message: record.message.clone(),
    }
}
