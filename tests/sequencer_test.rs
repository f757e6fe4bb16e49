//! Startup sequencing against scripted port and process state.
//!
//! The fakes stand in for the host: `FakeHost` answers port queries and
//! receives signals, `CountingReloader` records proxy reloads. No real port is
//! bound and no real process is signalled.

use async_trait::async_trait;
use parking_lot::Mutex;
use service_fleet::port::{PortInspector, ProcessControl, ProcessInfo};
use service_fleet::proxy::ProxyReloader;
use service_fleet::registry::{Cleanup, Preparer, ServiceContext, Started, Starter};
use service_fleet::{
    Config, Error, Event, LifecycleState, Options, Orchestrator, Ownership, Registry,
    ServiceKind, ServiceSpec,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct FakeHost {
    listeners: Mutex<HashMap<u16, ProcessInfo>>,
    alive: Mutex<HashSet<u32>>,
    terminated: Mutex<Vec<u32>>,
    /// Holders survive signals and keep their ports.
    stubborn: AtomicBool,
}

impl FakeHost {
    fn hold(&self, port: u16, pid: u32, command: &str) {
        self.listeners.lock().insert(
            port,
            ProcessInfo {
                pid,
                name: command.split_whitespace().next().unwrap_or_default().to_string(),
                command: Some(command.to_string()),
            },
        );
        self.alive.lock().insert(pid);
    }

    fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().clone()
    }
}

impl PortInspector for FakeHost {
    fn is_available(&self, port: u16) -> bool {
        !self.listeners.lock().contains_key(&port)
    }

    fn listener(&self, port: u16) -> service_fleet::Result<Option<ProcessInfo>> {
        Ok(self.listeners.lock().get(&port).cloned())
    }
}

impl ProcessControl for FakeHost {
    fn terminate(&self, pid: u32) -> service_fleet::Result<()> {
        self.terminated.lock().push(pid);
        if self.stubborn.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.alive.lock().remove(&pid);
        self.listeners.lock().retain(|_, owner| owner.pid != pid);
        Ok(())
    }

    fn kill(&self, pid: u32) -> service_fleet::Result<()> {
        self.terminate(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().contains(&pid)
    }

    fn find_by_pattern(&self, _pattern: &str) -> Vec<u32> {
        Vec::new()
    }
}

#[derive(Default)]
struct CountingReloader {
    reloads: AtomicUsize,
}

#[async_trait]
impl ProxyReloader for CountingReloader {
    async fn reload(&self, _config_file: &Path) -> service_fleet::Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Pretends to launch a process; flips `stopped` when its cleanup runs.
struct FakeStarter {
    pid: u32,
    stopped: Arc<AtomicBool>,
}

impl FakeStarter {
    fn new(pid: u32) -> (Arc<Self>, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        (
            Arc::new(Self {
                pid,
                stopped: stopped.clone(),
            }),
            stopped,
        )
    }
}

#[async_trait]
impl Starter for FakeStarter {
    async fn start(&self, _ctx: &ServiceContext) -> service_fleet::Result<Started> {
        let stopped = self.stopped.clone();
        Ok(Started::with_pid(
            self.pid,
            Cleanup::new(move || async move {
                stopped.store(true, Ordering::SeqCst);
            }),
        ))
    }
}

struct FailingStarter;

#[async_trait]
impl Starter for FailingStarter {
    async fn start(&self, ctx: &ServiceContext) -> service_fleet::Result<Started> {
        Err(Error::StartFailed(ctx.id().to_string(), "exit status 127".to_string()))
    }
}

/// Stands in for a required service that dies while the sequence runs.
struct CrashingStarter;

#[async_trait]
impl Starter for CrashingStarter {
    async fn start(&self, ctx: &ServiceContext) -> service_fleet::Result<Started> {
        ctx.errors
            .fatal(&Error::Process("nats crashed: bad config".to_string()));
        Ok(Started::default())
    }
}

struct FailingPreparer;

#[async_trait]
impl Preparer for FailingPreparer {
    async fn ensure(&self, _ctx: &ServiceContext) -> service_fleet::Result<()> {
        Err(Error::Filesystem("var/data: read-only file system".to_string()))
    }
}

fn options(dir: &TempDir, environment: &str) -> Options {
    Options::from_config(&Config::default(), dir.path()).with_environment(environment)
}

fn orchestrator(
    registry: Registry,
    host: &Arc<FakeHost>,
    reloader: &Arc<CountingReloader>,
) -> Orchestrator {
    Orchestrator::builder()
        .registry(registry)
        .inspector(host.clone())
        .process_control(host.clone())
        .reloader(reloader.clone())
        .build()
        .unwrap()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn free_port_starts_service() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let reloader = Arc::new(CountingReloader::default());
    let (starter, stopped) = FakeStarter::new(4242);

    let mut registry = Registry::new();
    registry
        .register(
            ServiceSpec::new("frontend", "Network frontend")
                .with_port(1337)
                .with_starter(starter),
        )
        .unwrap();

    let orchestrator = orchestrator(registry, &host, &reloader);
    let mut rx = orchestrator.subscribe();
    let session = orchestrator.start(options(&dir, "development")).await.unwrap();

    assert_eq!(session.state("frontend"), Some(LifecycleState::Running));
    assert_eq!(session.record("frontend").unwrap().pid, Some(4242));
    assert!(session.result().is_ok());

    let running = drain(&mut rx).into_iter().any(|event| {
        matches!(
            event,
            Event::ServiceStatus {
                ref id,
                running: true,
                ownership: Some(Ownership::Free),
                ..
            } if id == "frontend"
        )
    });
    assert!(running, "expected a running status with free ownership");

    session.shutdown().await;
    assert!(stopped.load(Ordering::SeqCst));
    assert_eq!(session.state("frontend"), Some(LifecycleState::Stopped));
}

#[tokio::test]
async fn stale_instance_is_reclaimed_in_development() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.hold(4195, 5150, "fleet-worker --service bento --config bento.yaml");
    let reloader = Arc::new(CountingReloader::default());
    let (starter, _) = FakeStarter::new(6000);

    let mut registry = Registry::new();
    registry
        .register(
            ServiceSpec::new("bento", "Stream processor")
                .with_port(4195)
                .with_starter(starter),
        )
        .unwrap();

    let orchestrator = orchestrator(registry, &host, &reloader);
    let mut rx = orchestrator.subscribe();
    let session = orchestrator.start(options(&dir, "development")).await.unwrap();

    assert_eq!(host.terminated(), vec![5150]);
    assert_eq!(session.state("bento"), Some(LifecycleState::Running));

    let states: Vec<LifecycleState> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            Event::ServiceStatus { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    let reclaimed = states.iter().position(|s| *s == LifecycleState::Reclaimed);
    let running = states.iter().position(|s| *s == LifecycleState::Running);
    assert!(reclaimed.is_some() && running.is_some());
    assert!(reclaimed < running);

    session.shutdown().await;
}

#[tokio::test]
async fn stale_instance_blocks_outside_development() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.hold(4195, 5150, "fleet-worker --service bento");
    let reloader = Arc::new(CountingReloader::default());
    let (starter, _) = FakeStarter::new(6000);

    let mut registry = Registry::new();
    registry
        .register(
            ServiceSpec::new("bento", "Stream processor")
                .with_port(4195)
                .with_starter(starter),
        )
        .unwrap();

    let orchestrator = orchestrator(registry, &host, &reloader);
    let err = orchestrator
        .start(options(&dir, "production"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::PortBlocked {
            ownership: Ownership::ThisService,
            port: 4195,
            ..
        }
    ));
    assert!(host.terminated().is_empty());
}

#[tokio::test]
async fn external_holder_aborts_the_whole_run() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.hold(8090, 777, "python3 -m http.server 8090");
    let reloader = Arc::new(CountingReloader::default());
    let (first, first_stopped) = FakeStarter::new(4242);
    let (web, _) = FakeStarter::new(4343);
    let (later, _) = FakeStarter::new(4444);

    let mut registry = Registry::new();
    registry
        .register(ServiceSpec::new("db", "Database").with_port(5432).with_starter(first))
        .unwrap();
    registry
        .register(ServiceSpec::new("web", "Web").with_port(8090).with_starter(web))
        .unwrap();
    registry
        .register(ServiceSpec::new("mail", "Mail").with_port(2525).with_starter(later))
        .unwrap();

    let orchestrator = orchestrator(registry, &host, &reloader);
    let mut rx = orchestrator.subscribe();
    let err = orchestrator
        .start(options(&dir, "development"))
        .await
        .unwrap_err();

    match err {
        Error::PortBlocked {
            ref service,
            port,
            ownership,
            pid,
            ..
        } => {
            assert_eq!(service, "web");
            assert_eq!(port, 8090);
            assert_eq!(ownership, Ownership::External);
            assert_eq!(pid, Some(777));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.to_string().contains("8090"));

    // The external holder is never signalled; the started service is torn down.
    assert!(host.terminated().is_empty());
    assert!(first_stopped.load(Ordering::SeqCst));

    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::ServiceStatus { id, state: LifecycleState::Blocked, .. } if id == "web"
    )));
    assert!(!events.iter().any(|event| matches!(
        event,
        Event::ServiceStatus { id, state: LifecycleState::Running, .. } if id == "mail"
    )));
}

#[tokio::test]
async fn start_failure_is_recorded_and_sequence_continues() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let reloader = Arc::new(CountingReloader::default());
    let (later, _) = FakeStarter::new(4444);

    let mut registry = Registry::new();
    registry
        .register(
            ServiceSpec::new("broken", "Broken")
                .with_port(7001)
                .with_starter(Arc::new(FailingStarter)),
        )
        .unwrap();
    registry
        .register(ServiceSpec::new("mail", "Mail").with_port(2525).with_starter(later))
        .unwrap();

    let orchestrator = orchestrator(registry, &host, &reloader);
    let session = orchestrator.start(options(&dir, "development")).await.unwrap();

    assert_eq!(session.state("broken"), Some(LifecycleState::Error));
    assert_eq!(session.state("mail"), Some(LifecycleState::Running));
    match session.result() {
        Err(Error::ServicesFailed(failed)) => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, "broken");
        }
        other => panic!("unexpected result {:?}", other),
    }

    session.shutdown().await;
}

#[tokio::test]
async fn routes_are_written_and_reloaded_once_proxy_runs() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let reloader = Arc::new(CountingReloader::default());
    let (proxy, _) = FakeStarter::new(5000);
    let (api, _) = FakeStarter::new(5001);

    let mut registry = Registry::new();
    registry
        .register(
            ServiceSpec::new("proxy", "Proxy")
                .with_kind(ServiceKind::Proxy)
                .with_port(8080)
                .with_starter(proxy),
        )
        .unwrap();
    registry
        .register(
            ServiceSpec::new("api", "API")
                .with_port(9000)
                .with_route("/api/*", "127.0.0.1:9000")
                .with_starter(api),
        )
        .unwrap();

    let opts = options(&dir, "development");
    let config_file = opts.proxy_config_file.clone();
    let orchestrator = orchestrator(registry, &host, &reloader);
    let session = orchestrator.start(opts).await.unwrap();

    let rendered = std::fs::read_to_string(&config_file).unwrap();
    assert!(rendered.contains(":8080 {"));
    assert!(rendered.contains("handle /api/* {"));
    assert!(rendered.contains("reverse_proxy 127.0.0.1:9000"));
    assert!(reloader.reloads.load(Ordering::SeqCst) >= 1);

    session.shutdown().await;
}

#[tokio::test]
async fn shutdown_runs_cleanups_once() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let reloader = Arc::new(CountingReloader::default());
    let (starter, stopped) = FakeStarter::new(4242);

    let mut registry = Registry::new();
    registry
        .register(ServiceSpec::new("db", "Database").with_starter(starter))
        .unwrap();

    let orchestrator = orchestrator(registry, &host, &reloader);
    let session = orchestrator.start(options(&dir, "development")).await.unwrap();

    let other = session.clone();
    tokio::join!(session.shutdown(), other.shutdown());
    assert!(stopped.load(Ordering::SeqCst));
    assert!(session.is_cancelled());
}

#[tokio::test]
async fn stale_instance_that_outlives_the_reclaim_window_blocks() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.stubborn.store(true, Ordering::SeqCst);
    host.hold(4195, 5150, "fleet-worker --service bento");
    let reloader = Arc::new(CountingReloader::default());
    let (bento, _) = FakeStarter::new(6000);
    let (later, later_stopped) = FakeStarter::new(6001);

    let mut registry = Registry::new();
    registry
        .register(
            ServiceSpec::new("bento", "Stream processor")
                .with_port(4195)
                .with_starter(bento),
        )
        .unwrap();
    registry
        .register(ServiceSpec::new("mail", "Mail").with_port(2525).with_starter(later))
        .unwrap();

    let mut opts = options(&dir, "development");
    opts.reclaim_timeout = Duration::from_millis(150);
    let orchestrator = orchestrator(registry, &host, &reloader);
    let mut rx = orchestrator.subscribe();
    let err = orchestrator.start(opts).await.unwrap_err();

    match err {
        Error::PortBlocked {
            ref service,
            port,
            ownership,
            pid,
            ..
        } => {
            assert_eq!(service, "bento");
            assert_eq!(port, 4195);
            assert_eq!(ownership, Ownership::ThisService);
            assert_eq!(pid, Some(5150));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(host.terminated().first(), Some(&5150));
    assert!(!later_stopped.load(Ordering::SeqCst));

    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::ServiceStatus { id, state: LifecycleState::Blocked, .. } if id == "bento"
    )));
    assert!(!events.iter().any(|event| matches!(
        event,
        Event::ServiceStatus { id, state: LifecycleState::Running, .. } if id == "mail"
    )));
}

#[tokio::test]
async fn other_fleet_instance_blocks_without_being_signalled() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    host.hold(8090, 900, "fleet up --only mail");
    let reloader = Arc::new(CountingReloader::default());
    let (web, _) = FakeStarter::new(4343);

    let mut registry = Registry::new();
    registry
        .register(ServiceSpec::new("web", "Web").with_port(8090).with_starter(web))
        .unwrap();

    let orchestrator = orchestrator(registry, &host, &reloader);
    let mut rx = orchestrator.subscribe();
    let err = orchestrator
        .start(options(&dir, "development"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::PortBlocked {
            ownership: Ownership::OtherInfra,
            port: 8090,
            pid: Some(900),
            ..
        }
    ));
    assert!(host.terminated().is_empty());
    assert!(drain(&mut rx).iter().any(|event| matches!(
        event,
        Event::ServiceStatus { id, state: LifecycleState::Blocked, .. } if id == "web"
    )));
}

#[tokio::test]
async fn ensure_failure_is_recorded_and_sequence_continues() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let reloader = Arc::new(CountingReloader::default());
    let (data, data_stopped) = FakeStarter::new(4242);
    let (later, _) = FakeStarter::new(4444);

    let mut registry = Registry::new();
    registry
        .register(
            ServiceSpec::new("data", "Data store")
                .with_port(7002)
                .with_preparer(Arc::new(FailingPreparer))
                .with_starter(data),
        )
        .unwrap();
    registry
        .register(ServiceSpec::new("mail", "Mail").with_port(2525).with_starter(later))
        .unwrap();

    let orchestrator = orchestrator(registry, &host, &reloader);
    let session = orchestrator.start(options(&dir, "development")).await.unwrap();

    assert_eq!(session.state("data"), Some(LifecycleState::Error));
    assert_eq!(session.record("data").unwrap().pid, None);
    assert_eq!(session.state("mail"), Some(LifecycleState::Running));
    match session.result() {
        Err(Error::ServicesFailed(failed)) => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, "data");
            assert!(failed[0].1.contains("read-only file system"));
        }
        other => panic!("unexpected result {:?}", other),
    }

    session.shutdown().await;
    assert!(!data_stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn required_failure_during_startup_is_reported_by_start() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(FakeHost::default());
    let reloader = Arc::new(CountingReloader::default());
    let (web, web_stopped) = FakeStarter::new(4343);

    let mut nats = ServiceSpec::new("nats", "Messaging")
        .with_port(4222)
        .with_starter(Arc::new(CrashingStarter));
    nats.required = true;

    let mut registry = Registry::new();
    registry.register(nats).unwrap();
    registry
        .register(ServiceSpec::new("web", "Web").with_port(8090).with_starter(web))
        .unwrap();

    let orchestrator = orchestrator(registry, &host, &reloader);
    let err = orchestrator
        .start(options(&dir, "development"))
        .await
        .unwrap_err();

    match err {
        Error::ServicesFailed(ref failed) => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, "nats");
            assert!(failed[0].1.contains("bad config"));
        }
        ref other => panic!("unexpected error {:?}", other),
    }
    assert!(err.to_string().contains("nats"));
    assert!(!web_stopped.load(Ordering::SeqCst));
}
