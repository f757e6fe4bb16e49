use super::ServiceSpec;
use crate::config::Options;
use crate::error::Error;
use crate::orchestrator::{LifecycleState, LifecycleTable};
use crate::supervisor::Supervisor;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type CleanupFn = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Deferred teardown registered by a starter. Runs at most once.
pub struct Cleanup(CleanupFn);

impl Cleanup {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Box::new(move || Box::pin(f())))
    }

    pub async fn run(self) {
        (self.0)().await
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// What a successful start hands back to the sequencer.
#[derive(Debug, Default)]
pub struct Started {
    pub pid: Option<u32>,
    pub cleanup: Option<Cleanup>,
}

impl Started {
    pub fn with_pid(pid: u32, cleanup: Cleanup) -> Self {
        Self {
            pid: Some(pid),
            cleanup: Some(cleanup),
        }
    }
}

/// A failure recorded against one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceFailure {
    pub service: String,
    pub message: String,
}

/// Records failures for one service, from the sequencer or from background
/// units owned by the service.
#[derive(Clone)]
pub struct ErrorRecorder {
    service_id: String,
    failures: Arc<Mutex<Vec<ServiceFailure>>>,
    table: LifecycleTable,
    cancel: CancellationToken,
}

impl ErrorRecorder {
    pub(crate) fn new(
        service_id: String,
        failures: Arc<Mutex<Vec<ServiceFailure>>>,
        table: LifecycleTable,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service_id,
            failures,
            table,
            cancel,
        }
    }

    /// Record a non-fatal failure and move the service to `error`.
    pub fn record(&self, error: &Error) {
        let message = error.to_string();
        tracing::error!(service = %self.service_id, "{}", message);
        self.failures.lock().push(ServiceFailure {
            service: self.service_id.clone(),
            message: message.clone(),
        });
        self.table
            .transition(&self.service_id, LifecycleState::Error, message);
    }

    /// Record a failure and cancel the whole session.
    pub fn fatal(&self, error: &Error) {
        self.record(error);
        tracing::error!(
            "Required service '{}' failed, cancelling all services",
            self.service_id
        );
        self.cancel.cancel();
    }
}

/// Everything a hook may use while preparing or starting one service.
#[derive(Clone)]
pub struct ServiceContext {
    pub spec: Arc<ServiceSpec>,
    pub options: Arc<Options>,
    /// The session's enabled specs, for hooks that aggregate across services.
    pub specs: Arc<Vec<Arc<ServiceSpec>>>,
    /// Cancelled when the session shuts down or a required service fails.
    pub cancel: CancellationToken,
    pub supervisor: Arc<Supervisor>,
    pub errors: ErrorRecorder,
}

impl ServiceContext {
    pub fn id(&self) -> &str {
        &self.spec.id
    }
}
