use super::session::Session;
use super::shutdown::ShutdownSweep;
use super::{LifecycleState, OrchestratorBuilder};
use crate::config::{Config, Options};
use crate::error::{Error, Result};
use crate::events::{ActionKind, Event, EventPublisher};
use crate::port::{
    format_conflict_message, inspect, reclaim_port, Ownership, PortInspector, Probe,
    ProcessControl, ReclaimOutcome, TERMINATE_GRACE,
};
use crate::proxy::{CaddyReloader, ProxyReloader};
use crate::registry::{Registry, ServiceSpec};
use crate::state::PidLedger;
use crate::supervisor::Supervisor;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Host-facing collaborators shared by the orchestrator and its sessions.
#[derive(Clone)]
pub(crate) struct Components {
    pub inspector: Arc<dyn PortInspector>,
    pub processes: Arc<dyn ProcessControl>,
    pub supervisor: Arc<Supervisor>,
    pub reloader: Arc<dyn ProxyReloader>,
    pub events: EventPublisher,
}

/// The sequencer: starts enabled services one at a time, policing their
/// ports, and hands back a [`Session`] that owns their shutdown.
pub struct Orchestrator {
    registry: Registry,
    components: Components,
}

impl Orchestrator {
    pub(super) fn new(registry: Registry, components: Components) -> Self {
        Self {
            registry,
            components,
        }
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Orchestrator for a config file with the real host components.
    pub fn from_config(config: &Config, options: &Options) -> Result<Self> {
        Self::builder()
            .registry(Registry::from_config(config, options)?)
            .reloader(Arc::new(CaddyReloader::new(options.proxy_binary.clone())))
            .build()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn events(&self) -> &EventPublisher {
        &self.components.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.components.events.subscribe()
    }

    /// Start every enabled service strictly in registry order.
    ///
    /// A port that cannot be reclaimed aborts the whole sequence: services
    /// already started are shut down and `PortBlocked` is returned. Ensure and
    /// start failures are recorded on the session and the sequence continues;
    /// see [`Session::result`].
    pub async fn start(&self, options: Options) -> Result<Session> {
        self.start_with_cancellation(options, CancellationToken::new())
            .await
    }

    /// Like [`start`](Self::start), but the session is cancelled through
    /// `cancel`, so a signal received mid-startup stops the sequence.
    /// A required service failing mid-startup returns `ServicesFailed`.
    pub async fn start_with_cancellation(
        &self,
        options: Options,
        cancel: CancellationToken,
    ) -> Result<Session> {
        let specs = Arc::new(self.registry.enabled(&options));
        let ledger = PidLedger::load_or_empty(options.pid_ledger_path());
        let session = Session::new(
            Arc::new(options),
            specs.clone(),
            self.components.clone(),
            ledger,
            cancel,
        );

        tracing::info!("Starting {} service(s)", specs.len());
        for spec in specs.iter() {
            session.register(spec);
        }

        for spec in specs.iter() {
            if session.is_cancelled() {
                let err = cancellation_error(
                    &session,
                    format!("startup cancelled before '{}'", spec.id),
                );
                session.shutdown().await;
                return Err(err);
            }

            let span = tracing::info_span!("service", id = %spec.id);
            if let Err(e) = self.bring_up(&session, spec).instrument(span).await {
                tracing::error!("Startup aborted: {}", e);
                session.shutdown().await;
                return Err(e);
            }
        }

        if session.is_cancelled() {
            let err = cancellation_error(&session, "startup cancelled".to_string());
            session.shutdown().await;
            return Err(err);
        }

        session.refresh_routes(true).await;

        let failed = session.failures().len();
        if failed == 0 {
            tracing::info!("All {} service(s) started", specs.len());
        } else {
            tracing::warn!(
                "Startup finished with {} failed service(s) out of {}",
                failed,
                specs.len()
            );
        }
        Ok(session)
    }

    /// Ensure, police ports, then start one service.
    ///
    /// `Err` means the whole sequence must abort.
    async fn bring_up(&self, session: &Session, spec: &Arc<ServiceSpec>) -> Result<()> {
        let id = spec.id.as_str();
        let options = session.options();
        let ctx = session.context(spec);

        if let Some(ref preparer) = spec.preparer {
            session.publish(Event::action(id, ActionKind::Ensure, "preparing"));
            if let Err(e) = preparer.ensure(&ctx).await {
                let err = match e {
                    Error::EnsureFailed(..) => e,
                    other => Error::EnsureFailed(id.to_string(), other.to_string()),
                };
                ctx.errors.record(&err);
                return Ok(());
            }
        }

        let expected_pid = session.expected_pid(id);
        let mut reclaimed = false;
        for (index, port) in spec.ports().into_iter().enumerate() {
            session.publish(Event::action(
                id,
                ActionKind::Inspect,
                format!("inspecting port {}", port),
            ));

            let probe = match inspect(
                self.components.inspector.as_ref(),
                port,
                expected_pid,
                spec,
                &options.marker,
            ) {
                Ok(probe) => probe,
                Err(e) => {
                    tracing::warn!("Owner of port {} unknown, starting anyway: {}", port, e);
                    if index == 0 {
                        session
                            .table()
                            .observe(id, None, format!("owner of port {} unknown", port));
                    }
                    continue;
                }
            };
            tracing::debug!(
                "Port {}: {} ({})",
                port,
                probe.ownership,
                probe.describe_owner()
            );
            if index == 0 {
                session.table().observe(id, Some(probe.ownership), "");
            }

            match (probe.ownership, probe.pid) {
                (Ownership::Free, _) => {}
                (Ownership::ThisService, Some(pid)) if options.dev_mode() => {
                    session.publish(Event::action(
                        id,
                        ActionKind::Reclaim,
                        format!("stopping stale PID {} on port {}", pid, port),
                    ));
                    match reclaim_port(
                        self.components.inspector.as_ref(),
                        self.components.processes.as_ref(),
                        port,
                        pid,
                        options.reclaim_timeout,
                    )
                    .await
                    {
                        ReclaimOutcome::Released { elapsed } => {
                            tracing::info!(
                                "Reclaimed port {} from stale PID {} in {:?}",
                                port,
                                pid,
                                elapsed
                            );
                            reclaimed = true;
                        }
                        outcome => {
                            tracing::warn!("Reclaim of port {} failed: {:?}", port, outcome);
                            return Err(self.block(session, spec, &probe));
                        }
                    }
                }
                _ => return Err(self.block(session, spec, &probe)),
            }
        }

        if reclaimed {
            session
                .table()
                .transition(id, LifecycleState::Reclaimed, "stale instance stopped");
        }
        if session.is_cancelled() {
            return Ok(());
        }

        session.publish(Event::action(id, ActionKind::Start, "starting"));
        session.table().mark_launched(id);
        match spec.starter.start(&ctx).await {
            Ok(started) => session.launched(spec, started).await,
            Err(e) => {
                let err = match e {
                    Error::StartFailed(..) | Error::Cancelled(_) => e,
                    other => Error::StartFailed(id.to_string(), other.to_string()),
                };
                ctx.errors.record(&err);
            }
        }
        Ok(())
    }

    fn block(&self, session: &Session, spec: &ServiceSpec, probe: &Probe) -> Error {
        let message = format_conflict_message(probe, spec, session.options().dev_mode());
        session
            .table()
            .transition(&spec.id, LifecycleState::Blocked, message.clone());
        Error::PortBlocked {
            service: spec.id.clone(),
            port: probe.port,
            ownership: probe.ownership,
            pid: probe.pid,
            command: probe.command.clone(),
            message,
        }
    }

    /// Stop whatever still runs for the enabled services, without a session.
    ///
    /// Uses the PID ledger, process names and a port sweep that only stops
    /// holders classified as the service itself. Returns `(id, stopped pids)`.
    pub async fn sweep(&self, options: &Options) -> Vec<(String, Vec<u32>)> {
        let mut ledger = PidLedger::load_or_empty(options.pid_ledger_path());
        let sweep = ShutdownSweep::new(
            self.components.inspector.as_ref(),
            self.components.processes.as_ref(),
            &options.marker,
            TERMINATE_GRACE,
        );

        let mut report = Vec::new();
        for spec in self.registry.enabled(options).iter().rev() {
            self.components
                .events
                .publish(Event::action(&spec.id, ActionKind::Stop, "sweeping"));
            let stopped = sweep.sweep(spec, ledger.get(&spec.id)).await;
            ledger.remove(&spec.id);
            report.push((spec.id.clone(), stopped));
        }

        if let Err(e) = ledger.save() {
            tracing::warn!("Failed to update PID ledger: {}", e);
        }
        report
    }
}

/// A fatal service failure cancels the session too; report it rather than
/// the bare cancellation.
fn cancellation_error(session: &Session, context: String) -> Error {
    match session.result() {
        Err(failed) => failed,
        Ok(()) => Error::Cancelled(context),
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("inspector", &"<inspector>")
            .field("processes", &"<process control>")
            .field("reloader", &"<reloader>")
            .finish()
    }
}
