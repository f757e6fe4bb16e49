use super::core::Components;
use super::{LifecycleState, LifecycleTable, ServiceRecord};
use crate::config::{Options, ServiceKind};
use crate::error::{Error, Result};
use crate::events::{ActionKind, Event};
use crate::registry::{Cleanup, ErrorRecorder, ServiceContext, ServiceFailure, ServiceSpec, Started};
use crate::proxy;
use crate::state::{self, PidLedger};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A started fleet. Cheap to clone; all clones share one shutdown.
#[derive(Clone)]
pub struct Session {
    pub(super) inner: Arc<SessionInner>,
}

pub(super) struct SessionInner {
    pub options: Arc<Options>,
    pub specs: Arc<Vec<Arc<ServiceSpec>>>,
    pub components: Components,
    pub cancel: CancellationToken,
    pub table: LifecycleTable,
    pub failures: Arc<parking_lot::Mutex<Vec<ServiceFailure>>>,
    /// Registered in start order; run in reverse on shutdown.
    pub cleanups: tokio::sync::Mutex<Vec<(String, Cleanup)>>,
    pub ledger: parking_lot::Mutex<PidLedger>,
    pub shutdown_started: AtomicBool,
}

impl Session {
    pub(super) fn new(
        options: Arc<Options>,
        specs: Arc<Vec<Arc<ServiceSpec>>>,
        components: Components,
        ledger: PidLedger,
        cancel: CancellationToken,
    ) -> Self {
        let table = LifecycleTable::new(components.events.clone());
        Self {
            inner: Arc::new(SessionInner {
                options,
                specs,
                components,
                cancel,
                table,
                failures: Arc::new(parking_lot::Mutex::new(Vec::new())),
                cleanups: tokio::sync::Mutex::new(Vec::new()),
                ledger: parking_lot::Mutex::new(ledger),
                shutdown_started: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &Arc<Options> {
        &self.inner.options
    }

    /// The enabled specs this session was started with, in start order.
    pub fn specs(&self) -> &[Arc<ServiceSpec>] {
        &self.inner.specs
    }

    pub fn record(&self, id: &str) -> Option<ServiceRecord> {
        self.inner.table.get(id)
    }

    pub fn state(&self, id: &str) -> Option<LifecycleState> {
        self.inner.table.state(id)
    }

    pub fn failures(&self) -> Vec<ServiceFailure> {
        self.inner.failures.lock().clone()
    }

    /// `Err(ServicesFailed)` if any ensure, start or background failure was recorded.
    pub fn result(&self) -> Result<()> {
        let failures = self.failures();
        if failures.is_empty() {
            return Ok(());
        }
        Err(Error::ServicesFailed(
            failures
                .into_iter()
                .map(|f| (f.service, f.message))
                .collect(),
        ))
    }

    /// Token cancelled on shutdown or when a required service fails.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolve once the session is cancelled.
    pub async fn wait(&self) {
        self.inner.cancel.cancelled().await
    }

    pub(super) fn table(&self) -> &LifecycleTable {
        &self.inner.table
    }

    pub(super) fn publish(&self, event: Event) {
        self.inner.components.events.publish(event);
    }

    pub(super) fn register(&self, spec: &ServiceSpec) {
        self.inner.table.register(&spec.id, spec.port);
        self.publish(Event::ServiceRegistered {
            id: spec.id.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            icon: spec.icon.clone(),
            required: spec.required,
            port: spec.port,
        });
    }

    /// PID the orchestrator last recorded for `id`, from this run or a previous one.
    pub(super) fn expected_pid(&self, id: &str) -> Option<u32> {
        self.inner
            .table
            .get(id)
            .and_then(|r| r.pid)
            .or_else(|| self.inner.ledger.lock().get(id))
    }

    pub(super) fn context(&self, spec: &Arc<ServiceSpec>) -> ServiceContext {
        let inner = &self.inner;
        ServiceContext {
            spec: spec.clone(),
            options: inner.options.clone(),
            specs: inner.specs.clone(),
            cancel: inner.cancel.clone(),
            supervisor: inner.components.supervisor.clone(),
            errors: ErrorRecorder::new(
                spec.id.clone(),
                inner.failures.clone(),
                inner.table.clone(),
                inner.cancel.clone(),
            ),
        }
    }

    /// Book-keeping after a successful start hook.
    pub(super) async fn launched(&self, spec: &ServiceSpec, started: Started) {
        let id = spec.id.as_str();
        if let Some(pid) = started.pid {
            self.inner.table.set_pid(id, pid);
            let mut ledger = self.inner.ledger.lock();
            ledger.record(id, pid);
            if let Err(e) = ledger.save() {
                tracing::warn!("Failed to update PID ledger: {}", e);
            }
        }
        if let Some(cleanup) = started.cleanup {
            self.inner.cleanups.lock().await.push((id.to_string(), cleanup));
        }

        let message = started
            .pid
            .map(|pid| format!("PID {}", pid))
            .unwrap_or_default();
        if self.inner.table.transition(id, LifecycleState::Running, message) {
            tracing::info!("Service '{}' is running", id);
        }

        // The proxy was just started on the current routes.
        self.refresh_routes(spec.kind != ServiceKind::Proxy).await;
    }

    /// Recompute routes from the enabled specs, persist the proxy config and,
    /// if `reload` and the proxy is running, live-reload it.
    ///
    /// Never fails: a proxy that misses a reload keeps serving its previous
    /// configuration.
    pub async fn refresh_routes(&self, reload: bool) {
        let options = &self.inner.options;
        let Some(config) =
            proxy::aggregate(&self.inner.specs, options.proxy_root_service.as_deref())
        else {
            tracing::debug!("No proxy service with a port enabled, skipping route aggregation");
            return;
        };

        let rendered = proxy::render_caddyfile(&config);
        if let Err(e) = state::write_atomic(&options.proxy_config_file, rendered.as_bytes()) {
            tracing::warn!("Failed to write proxy config: {}", e);
            return;
        }

        let Some(proxy_spec) = self
            .inner
            .specs
            .iter()
            .find(|s| s.kind == ServiceKind::Proxy)
        else {
            return;
        };
        if !reload || self.state(&proxy_spec.id) != Some(LifecycleState::Running) {
            return;
        }

        self.publish(Event::action(
            &proxy_spec.id,
            ActionKind::Reload,
            format!("{} route(s)", config.routes.len()),
        ));
        if let Err(e) = self
            .inner
            .components
            .reloader
            .reload(&options.proxy_config_file)
            .await
        {
            tracing::warn!("Proxy reload failed, previous configuration stays live: {}", e);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("services", &self.inner.specs.len())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
