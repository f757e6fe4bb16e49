use service_fleet::{Error, Options, Parser, Registry, ServiceKind};
use std::path::Path;

const FLEET_YAML: &str = r#"
environment: development
store_dir: .state
proxy:
  root_service: frontend

services:
  - id: nats
    name: Messaging
    icon: "@"
    required: true
    kind: messaging
    port: 4222
    command: ["nats-server"]

  - id: caddy
    name: Reverse proxy
    kind: proxy
    port: "8080"

  - id: frontend
    name: Network frontend
    port: 1337
    command: ["npm", "run", "dev"]
    routes:
      - path: /app/*
        target: 127.0.0.1:1337
    ensure_dirs: [var/frontend]

  - id: mail
    name: Mail
    port: ""
    environments: [production]
"#;

#[test]
fn parses_and_validates_a_fleet() {
    let config = Parser::new().parse_config(FLEET_YAML).unwrap();
    config.validate().unwrap();

    assert_eq!(config.services.len(), 4);
    assert_eq!(config.services[0].kind, ServiceKind::Messaging);
    assert_eq!(config.services[1].port.resolve(), Ok(Some(8080)));
    assert_eq!(config.services[3].port.resolve(), Ok(None));
    assert_eq!(config.proxy.root_service.as_deref(), Some("frontend"));
    assert_eq!(config.reclaim_timeout_ms, 3000);
}

#[test]
fn options_resolve_store_paths_against_work_dir() {
    let config = Parser::new().parse_config(FLEET_YAML).unwrap();
    let options = Options::from_config(&config, Path::new("/srv/fleet"));

    assert!(options.dev_mode());
    assert_eq!(options.store_dir, Path::new("/srv/fleet/.state"));
    assert_eq!(options.proxy_config_file, Path::new("/srv/fleet/.state/Caddyfile"));
    assert_eq!(options.identity_dir, Path::new("/srv/fleet/.state/identity"));
    assert_eq!(options.pid_ledger_path(), Path::new("/srv/fleet/.state/pids.json"));
}

#[test]
fn registry_honours_environments_and_filters() {
    let config = Parser::new().parse_config(FLEET_YAML).unwrap();
    let options = Options::from_config(&config, Path::new("/srv/fleet"));
    let registry = Registry::from_config(&config, &options).unwrap();
    assert_eq!(registry.len(), 4);

    let enabled: Vec<String> = registry
        .enabled(&options)
        .iter()
        .map(|s| s.id.clone())
        .collect();
    assert_eq!(enabled, vec!["nats", "caddy", "frontend"]);

    let production = options.clone().with_environment("production");
    assert!(!production.dev_mode());
    let enabled: Vec<String> = registry
        .enabled(&production)
        .iter()
        .map(|s| s.id.clone())
        .collect();
    assert_eq!(enabled, vec!["nats", "caddy", "frontend", "mail"]);

    let filtered = options.with_filters(vec![], vec!["caddy".to_string()]);
    assert!(registry.enabled(&filtered).iter().all(|s| s.id != "caddy"));
}

#[test]
fn duplicate_ids_are_rejected() {
    let yaml = r#"
services:
  - id: web
    port: 80
  - id: web
    port: 81
"#;
    let config = Parser::new().parse_config(yaml).unwrap();
    assert!(matches!(config.validate(), Err(Error::DuplicateService(id)) if id == "web"));
}

#[test]
fn bad_route_target_is_rejected() {
    let yaml = r#"
services:
  - id: web
    port: 80
    routes:
      - path: /web
        target: localhost
"#;
    let config = Parser::new().parse_config(yaml).unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.suggestion().is_some());
}

#[test]
fn unknown_root_service_is_rejected() {
    let yaml = r#"
proxy:
  root_service: ghost
services:
  - id: web
    port: 80
"#;
    let config = Parser::new().parse_config(yaml).unwrap();
    assert!(config.validate().is_err());
}
