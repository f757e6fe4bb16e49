//! Service registry.
//!
//! A [`ServiceSpec`] is the immutable, fully resolved description of one
//! service: identity, ports, routes and the hooks that prepare and start it.
//! The [`Registry`] keeps specs in declaration order, which is also the
//! startup priority order.

mod builtin;
mod context;

pub use builtin::{DirPreparer, MessagingStarter, ProcessStarter, ProxyStarter};
pub use context::{Cleanup, ErrorRecorder, ServiceContext, ServiceFailure, Started};

use crate::config::{Config, Options, ServiceConfig, ServiceKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A path-prefix route a service contributes to the reverse proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RouteSpec {
    pub path: String,
    pub target: String,
}

impl RouteSpec {
    pub fn new(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
        }
    }
}

/// Idempotent pre-start work (directories, generated files).
#[async_trait]
pub trait Preparer: Send + Sync {
    async fn ensure(&self, ctx: &ServiceContext) -> Result<()>;
}

/// Launches a service and hands back its PID and cleanup.
#[async_trait]
pub trait Starter: Send + Sync {
    async fn start(&self, ctx: &ServiceContext) -> Result<Started>;
}

/// Starter for services with nothing to launch (hosted elsewhere, route only).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStarter;

#[async_trait]
impl Starter for NoopStarter {
    async fn start(&self, _ctx: &ServiceContext) -> Result<Started> {
        Ok(Started::default())
    }
}

/// Immutable description of one service.
#[derive(Clone)]
pub struct ServiceSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    /// Unexpected exit of a required service cancels the whole session.
    pub required: bool,
    pub kind: ServiceKind,
    pub port: Option<u16>,
    pub additional_ports: Vec<u16>,
    pub routes: Vec<RouteSpec>,
    /// Command-line substrings identifying this service's processes.
    pub process_names: Vec<String>,
    pub enabled: bool,
    /// Environments the service runs in; empty means all.
    pub environments: Vec<String>,
    pub preparer: Option<Arc<dyn Preparer>>,
    pub starter: Arc<dyn Starter>,
}

impl ServiceSpec {
    /// A minimal enabled spec with no ports, routes or hooks.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            icon: String::new(),
            required: false,
            kind: ServiceKind::Process,
            port: None,
            additional_ports: Vec::new(),
            routes: Vec::new(),
            process_names: Vec::new(),
            enabled: true,
            environments: Vec::new(),
            preparer: None,
            starter: Arc::new(NoopStarter),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_route(mut self, path: impl Into<String>, target: impl Into<String>) -> Self {
        self.routes.push(RouteSpec::new(path, target));
        self
    }

    pub fn with_kind(mut self, kind: ServiceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_preparer(mut self, preparer: Arc<dyn Preparer>) -> Self {
        self.preparer = Some(preparer);
        self
    }

    pub fn with_starter(mut self, starter: Arc<dyn Starter>) -> Self {
        self.starter = starter;
        self
    }

    /// Primary port followed by additional ports.
    pub fn ports(&self) -> Vec<u16> {
        self.port
            .into_iter()
            .chain(self.additional_ports.iter().copied())
            .collect()
    }

    /// The enable predicate, evaluated against the options of one run.
    pub fn is_enabled(&self, options: &Options) -> bool {
        if !self.enabled || !options.allows(&self.id) {
            return false;
        }
        self.environments.is_empty() || self.environments.iter().any(|e| *e == options.environment)
    }

    /// Build a spec for one config entry, wiring the built-in hooks for its kind.
    pub fn from_config(service: &ServiceConfig, options: &Options) -> Result<Self> {
        let invalid_port =
            |e: String| Error::Validation(format!("Service '{}': {}", service.id, e));
        let port = service.port.resolve().map_err(invalid_port)?;
        let mut additional_ports = Vec::new();
        for extra in &service.additional_ports {
            if let Some(p) = extra.resolve().map_err(invalid_port)? {
                additional_ports.push(p);
            }
        }

        let name = service.name.clone().unwrap_or_else(|| service.id.clone());
        let mut spec = Self::new(service.id.clone(), name).with_kind(service.kind);
        spec.description = service.description.clone().unwrap_or_default();
        spec.icon = service.icon.clone().unwrap_or_default();
        spec.required = service.required;
        spec.port = port;
        spec.additional_ports = additional_ports;
        spec.routes = service
            .routes
            .iter()
            .map(|r| RouteSpec::new(r.path.clone(), r.target.clone()))
            .collect();
        spec.process_names = service.process_names.clone();
        spec.enabled = service.enabled;
        spec.environments = service.environments.clone();

        if !service.ensure_dirs.is_empty() {
            let dirs = service
                .ensure_dirs
                .iter()
                .map(|d| options.resolve_path(d))
                .collect();
            spec.preparer = Some(Arc::new(DirPreparer::new(dirs)));
        }

        let cwd = service.cwd.as_ref().map(|d| options.resolve_path(d));
        spec.starter = match service.kind {
            ServiceKind::Process if service.command.is_empty() => Arc::new(NoopStarter),
            ServiceKind::Process => Arc::new(ProcessStarter::new(
                service.command.clone(),
                service.env.clone(),
                cwd,
            )),
            ServiceKind::Proxy => Arc::new(ProxyStarter::new(
                service.command.clone(),
                service.env.clone(),
                cwd,
            )),
            ServiceKind::Messaging => Arc::new(MessagingStarter::new(
                service.command.clone(),
                service.env.clone(),
                cwd,
            )),
        };

        Ok(spec)
    }
}

impl fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSpec")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("port", &self.port)
            .field("additional_ports", &self.additional_ports)
            .field("routes", &self.routes)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Ordered set of specs with unique ids.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    specs: Vec<Arc<ServiceSpec>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a spec. Ids must be unique.
    pub fn register(&mut self, spec: ServiceSpec) -> Result<()> {
        if self.get(&spec.id).is_some() {
            return Err(Error::DuplicateService(spec.id));
        }
        tracing::debug!("Registered service '{}' ({})", spec.id, spec.kind);
        self.specs.push(Arc::new(spec));
        Ok(())
    }

    /// Build the registry for every service in `config`, in file order.
    pub fn from_config(config: &Config, options: &Options) -> Result<Self> {
        let mut registry = Self::new();
        for service in &config.services {
            registry.register(ServiceSpec::from_config(service, options)?)?;
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ServiceSpec>> {
        self.specs.iter().find(|s| s.id == id)
    }

    pub fn all(&self) -> &[Arc<ServiceSpec>] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Specs whose enable predicate holds for `options`, in registry order.
    pub fn enabled(&self, options: &Options) -> Vec<Arc<ServiceSpec>> {
        self.specs
            .iter()
            .filter(|s| s.is_enabled(options))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parser;
    use std::path::Path;

    fn options() -> Options {
        Options::from_config(&Config::default(), Path::new("/srv/app"))
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = Registry::new();
        registry.register(ServiceSpec::new("web", "Web")).unwrap();
        let err = registry.register(ServiceSpec::new("web", "Web 2")).unwrap_err();
        assert!(matches!(err, Error::DuplicateService(ref id) if id == "web"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn enabled_keeps_declaration_order() {
        let mut registry = Registry::new();
        for id in ["proxy", "web", "bento", "nats"] {
            registry.register(ServiceSpec::new(id, id)).unwrap();
        }
        let opts = options().with_filters(vec![], vec!["bento".into()]);
        let ids: Vec<_> = registry.enabled(&opts).iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["proxy", "web", "nats"]);
    }

    #[test]
    fn environment_and_flag_gate_services() {
        let mut seed = ServiceSpec::new("seed", "Seed");
        seed.environments = vec!["development".into()];
        let mut mail = ServiceSpec::new("mail", "Mail");
        mail.enabled = false;

        let dev = options();
        let prod = options().with_environment("production");
        assert!(seed.is_enabled(&dev));
        assert!(!seed.is_enabled(&prod));
        assert!(!mail.is_enabled(&dev));
        assert!(ServiceSpec::new("web", "Web").is_enabled(&prod));
    }

    #[test]
    fn specs_are_built_from_config() {
        let yaml = r#"
services:
  - id: bento
    name: Bento
    port: "4195"
    additional_ports: [4196, ""]
    command: ["bento", "-c", "bento.yaml"]
    routes:
      - path: /streams/*
        target: 127.0.0.1:4195
  - id: docs
    port: 0
"#;
        let config = Parser::new().parse_config(yaml).unwrap();
        let registry = Registry::from_config(&config, &options()).unwrap();
        let bento = registry.get("bento").unwrap();
        assert_eq!(bento.ports(), vec![4195, 4196]);
        assert_eq!(bento.routes[0].path, "/streams/*");
        let docs = registry.get("docs").unwrap();
        assert_eq!(docs.port, None);
        assert_eq!(docs.name, "docs");
        assert!(docs.ports().is_empty());
    }
}
