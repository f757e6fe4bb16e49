use super::core::Components;
use super::Orchestrator;
use crate::error::{Error, Result};
use crate::events::EventPublisher;
use crate::port::{PortInspector, ProcessControl, SystemInspector, SystemProcessControl};
use crate::proxy::{CaddyReloader, ProxyReloader};
use crate::registry::Registry;
use crate::supervisor::Supervisor;
use std::sync::Arc;

/// Builder for constructing an `Orchestrator` with a fluent API.
///
/// Only the registry is required. Everything that touches the host (port
/// inspection, signals, the supervisor, proxy reloads) defaults to the real
/// implementation and can be replaced, which is how the sequencer is tested.
///
/// # Example
///
/// ```no_run
/// use service_fleet::{Orchestrator, Registry};
///
/// # fn example() -> Result<(), service_fleet::Error> {
/// let orchestrator = Orchestrator::builder()
///     .registry(Registry::new())
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct OrchestratorBuilder {
    registry: Option<Registry>,
    inspector: Option<Arc<dyn PortInspector>>,
    processes: Option<Arc<dyn ProcessControl>>,
    supervisor: Option<Arc<Supervisor>>,
    reloader: Option<Arc<dyn ProxyReloader>>,
    events: Option<EventPublisher>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service registry. Required.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn inspector(mut self, inspector: Arc<dyn PortInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn process_control(mut self, processes: Arc<dyn ProcessControl>) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn supervisor(mut self, supervisor: Arc<Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn reloader(mut self, reloader: Arc<dyn ProxyReloader>) -> Self {
        self.reloader = Some(reloader);
        self
    }

    /// Publish lifecycle events on an existing channel.
    pub fn events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let registry = self
            .registry
            .ok_or_else(|| Error::Config("Registry is required".to_string()))?;

        let components = Components {
            inspector: self.inspector.unwrap_or_else(|| Arc::new(SystemInspector)),
            processes: self
                .processes
                .unwrap_or_else(|| Arc::new(SystemProcessControl)),
            supervisor: self
                .supervisor
                .unwrap_or_else(|| Arc::new(Supervisor::new())),
            reloader: self
                .reloader
                .unwrap_or_else(|| Arc::new(CaddyReloader::default())),
            events: self.events.unwrap_or_default(),
        };

        Ok(Orchestrator::new(registry, components))
    }
}
