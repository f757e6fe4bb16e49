//! Shutdown: cleanups in reverse order, then a sweep that makes sure nothing
//! this session launched is still bound to a declared port.

use super::session::Session;
use super::LifecycleState;
use crate::events::{ActionKind, Event};
use crate::port::{inspect, terminate_and_wait, Ownership, PortInspector, ProcessControl, TERMINATE_GRACE};
use crate::registry::ServiceSpec;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Stops leftover processes of one service: by PID, by process name, then
/// by port (only holders classified as the service itself).
pub(super) struct ShutdownSweep<'a> {
    inspector: &'a dyn PortInspector,
    processes: &'a dyn ProcessControl,
    marker: &'a str,
    grace: Duration,
}

impl<'a> ShutdownSweep<'a> {
    pub fn new(
        inspector: &'a dyn PortInspector,
        processes: &'a dyn ProcessControl,
        marker: &'a str,
        grace: Duration,
    ) -> Self {
        Self {
            inspector,
            processes,
            marker,
            grace,
        }
    }

    /// Returns the PIDs that were signalled.
    pub async fn sweep(&self, spec: &ServiceSpec, expected_pid: Option<u32>) -> Vec<u32> {
        let own_pid = std::process::id();
        let mut stopped = Vec::new();

        if let Some(pid) = expected_pid {
            if pid != own_pid && self.processes.is_alive(pid) {
                self.stop(spec, pid, &mut stopped).await;
            }
        }

        for name in spec.process_names.iter().filter(|n| !n.is_empty()) {
            for pid in self.processes.find_by_pattern(name) {
                if pid != own_pid && !stopped.contains(&pid) {
                    self.stop(spec, pid, &mut stopped).await;
                }
            }
        }

        for port in spec.ports() {
            if self.inspector.is_available(port) {
                continue;
            }
            match inspect(self.inspector, port, expected_pid, spec, self.marker) {
                Ok(probe) => match (probe.ownership, probe.pid) {
                    (Ownership::ThisService, Some(pid))
                        if pid != own_pid && !stopped.contains(&pid) =>
                    {
                        self.stop(spec, pid, &mut stopped).await;
                    }
                    _ => tracing::debug!(
                        "Leaving port {} to {} ({})",
                        port,
                        probe.describe_owner(),
                        probe.ownership
                    ),
                },
                Err(e) => tracing::debug!("Port {} sweep skipped: {}", port, e),
            }
        }

        stopped
    }

    async fn stop(&self, spec: &ServiceSpec, pid: u32, stopped: &mut Vec<u32>) {
        tracing::debug!("Stopping leftover PID {} of '{}'", pid, spec.id);
        if !terminate_and_wait(self.processes, pid, self.grace).await {
            tracing::warn!("PID {} of '{}' survived SIGKILL", pid, spec.id);
        }
        stopped.push(pid);
    }
}

impl Session {
    /// Cancel, run cleanups in reverse registration order, sweep launched
    /// services, then stop everything the supervisor still tracks.
    ///
    /// Idempotent and infallible: only the first call does anything.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner
            .shutdown_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Shutdown already in progress or completed, skipping");
            return;
        }

        tracing::info!("Shutting down");
        inner.cancel.cancel();

        let cleanups = std::mem::take(&mut *inner.cleanups.lock().await);
        for (id, cleanup) in cleanups.into_iter().rev() {
            self.publish(Event::action(&id, ActionKind::Stop, "stopping"));
            cleanup.run().await;
        }

        let sweep = ShutdownSweep::new(
            inner.components.inspector.as_ref(),
            inner.components.processes.as_ref(),
            &inner.options.marker,
            TERMINATE_GRACE,
        );
        for spec in inner.specs.iter().rev() {
            let Some(record) = inner.table.get(&spec.id) else {
                continue;
            };
            if record.launched {
                let expected = record.pid.or_else(|| inner.ledger.lock().get(&spec.id));
                let stopped = sweep.sweep(spec, expected).await;
                if !stopped.is_empty() {
                    tracing::info!("Stopped leftover PIDs {:?} of '{}'", stopped, spec.id);
                }
                inner.ledger.lock().remove(&spec.id);
            }
            inner
                .table
                .transition(&spec.id, LifecycleState::Stopped, "");
        }

        inner.components.supervisor.stop_all().await;

        if let Err(e) = inner.ledger.lock().save() {
            tracing::warn!("Failed to update PID ledger: {}", e);
        }
        tracing::info!("Shutdown complete");
    }
}
