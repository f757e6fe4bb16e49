//! Background exit handling for supervised children.
//!
//! Runs a real `sh` child that outlives the startup settle window and then
//! exits non-zero. The services declare no ports, so the host's sockets are
//! never inspected.

use service_fleet::registry::ProcessStarter;
use service_fleet::{
    Config, LifecycleState, Options, Orchestrator, Registry, ServiceSpec, Session,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn flaky(required: bool) -> ServiceSpec {
    let starter = ProcessStarter::new(
        vec![
            "sh".to_string(),
            "-c".to_string(),
            "sleep 0.5; exit 1".to_string(),
        ],
        BTreeMap::new(),
        None,
    );
    let mut spec = ServiceSpec::new("flaky", "Flaky worker").with_starter(Arc::new(starter));
    spec.required = required;
    spec
}

async fn start(dir: &TempDir, spec: ServiceSpec) -> Session {
    let mut registry = Registry::new();
    registry.register(spec).unwrap();
    let options = Options::from_config(&Config::default(), dir.path());
    Orchestrator::builder()
        .registry(registry)
        .build()
        .unwrap()
        .start(options)
        .await
        .unwrap()
}

async fn wait_for_state(session: &Session, id: &str, state: LifecycleState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.state(id) != Some(state) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("'{}' never reached {}", id, state));
}

#[tokio::test]
async fn required_service_exit_cancels_the_session() {
    let dir = TempDir::new().unwrap();
    let session = start(&dir, flaky(true)).await;
    assert_eq!(session.state("flaky"), Some(LifecycleState::Running));
    assert!(!session.is_cancelled());

    tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .expect("required exit should cancel the session");

    assert!(session.is_cancelled());
    assert_eq!(session.state("flaky"), Some(LifecycleState::Error));
    let failures = session.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("exited unexpectedly"));

    session.shutdown().await;
}

#[tokio::test]
async fn optional_service_exit_is_only_recorded() {
    let dir = TempDir::new().unwrap();
    let session = start(&dir, flaky(false)).await;
    assert_eq!(session.state("flaky"), Some(LifecycleState::Running));

    wait_for_state(&session, "flaky", LifecycleState::Error).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!session.is_cancelled());
    assert!(session.result().is_err());

    session.shutdown().await;
}
