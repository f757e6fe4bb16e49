use crate::config::ServiceKind;
use crate::registry::{RouteSpec, ServiceSpec};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Everything the proxy needs to serve the current fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyConfig {
    pub listen_port: u16,
    /// Backend for requests no route matches.
    pub root_target: Option<String>,
    /// Unique by path, sorted by path.
    pub routes: Vec<RouteSpec>,
}

/// Build the proxy configuration from the enabled specs.
///
/// The listen port is the port of the `proxy` service; `None` when there is
/// no proxy or it declares no port. The root backend is `root_service`, or
/// the first non-proxy service with a port. Routes are de-duplicated by path
/// (first declaration wins) and sorted, so the output depends only on the
/// set of specs.
pub fn aggregate(specs: &[Arc<ServiceSpec>], root_service: Option<&str>) -> Option<ProxyConfig> {
    let listen_port = specs
        .iter()
        .find(|s| s.kind == ServiceKind::Proxy)
        .and_then(|s| s.port)?;

    let root = match root_service {
        Some(id) => specs.iter().find(|s| s.id == id),
        None => specs
            .iter()
            .find(|s| s.kind != ServiceKind::Proxy && s.port.is_some()),
    };
    let root_target = root
        .and_then(|s| s.port)
        .map(|port| format!("127.0.0.1:{}", port));

    let mut seen = HashSet::new();
    let mut routes: Vec<RouteSpec> = Vec::new();
    for spec in specs {
        for route in &spec.routes {
            if seen.insert(route.path.clone()) {
                routes.push(route.clone());
            } else {
                tracing::debug!(
                    "Route {} from '{}' shadowed by an earlier service",
                    route.path,
                    spec.id
                );
            }
        }
    }
    routes.sort_by(|a, b| a.path.cmp(&b.path));

    Some(ProxyConfig {
        listen_port,
        root_target,
        routes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> Vec<Arc<ServiceSpec>> {
        vec![
            Arc::new(
                ServiceSpec::new("proxy", "Proxy")
                    .with_kind(ServiceKind::Proxy)
                    .with_port(8080),
            ),
            Arc::new(ServiceSpec::new("web", "Web").with_port(1337)),
            Arc::new(
                ServiceSpec::new("bento", "Bento")
                    .with_port(4195)
                    .with_route("/streams/*", "127.0.0.1:4195"),
            ),
            Arc::new(
                ServiceSpec::new("api", "API")
                    .with_port(9000)
                    .with_route("/api/*", "127.0.0.1:9000")
                    .with_route("/streams/*", "127.0.0.1:9000"),
            ),
        ]
    }

    #[test]
    fn first_writer_wins_and_routes_sort() {
        let config = aggregate(&fleet(), None).unwrap();
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.root_target.as_deref(), Some("127.0.0.1:1337"));
        assert_eq!(
            config.routes,
            vec![
                RouteSpec::new("/api/*", "127.0.0.1:9000"),
                RouteSpec::new("/streams/*", "127.0.0.1:4195"),
            ]
        );
    }

    #[test]
    fn explicit_root_service() {
        let config = aggregate(&fleet(), Some("api")).unwrap();
        assert_eq!(config.root_target.as_deref(), Some("127.0.0.1:9000"));
    }

    #[test]
    fn no_proxy_means_nothing_to_render() {
        let specs: Vec<_> = fleet().into_iter().skip(1).collect();
        assert!(aggregate(&specs, None).is_none());
    }
}
