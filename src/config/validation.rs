use super::{Config, ServiceKind};
use crate::error::{Error, Result};
use std::collections::HashSet;

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if service.id.trim().is_empty() {
                return Err(Error::Validation("Service id cannot be empty".to_string()));
            }
            if !seen.insert(service.id.as_str()) {
                return Err(Error::DuplicateService(service.id.clone()));
            }

            service.port.resolve().map_err(|e| {
                Error::Validation(format!("Service '{}' has invalid port: {}", service.id, e))
            })?;
            for extra in &service.additional_ports {
                extra.resolve().map_err(|e| {
                    Error::Validation(format!(
                        "Service '{}' has invalid additional port: {}",
                        service.id, e
                    ))
                })?;
            }

            for route in &service.routes {
                if !route.path.starts_with('/') {
                    return Err(Error::Validation(format!(
                        "Service '{}' route '{}' must start with '/'",
                        service.id, route.path
                    )));
                }
                if !is_host_port(&route.target) {
                    return Err(Error::Validation(format!(
                        "Service '{}' route '{}' has target '{}', expected host:port",
                        service.id, route.path, route.target
                    )));
                }
            }

            if service.kind == ServiceKind::Messaging && service.command.is_empty() {
                return Err(Error::Validation(format!(
                    "Messaging service '{}' needs a command (e.g. [\"nats-server\"])",
                    service.id
                )));
            }
        }

        let proxies = self
            .services
            .iter()
            .filter(|s| s.kind == ServiceKind::Proxy)
            .count();
        if proxies > 1 {
            return Err(Error::Validation(format!(
                "Only one proxy service may be declared, found {}",
                proxies
            )));
        }

        if let Some(ref root) = self.proxy.root_service {
            if self.service(root).is_none() {
                return Err(Error::Validation(format!(
                    "proxy.root_service '{}' references non-existent service",
                    root
                )));
            }
        }

        self.validate_identity()?;

        Ok(())
    }

    /// Account and user names become artifact file names, so they must be
    /// plain names and must not collide.
    fn validate_identity(&self) -> Result<()> {
        let identity = &self.identity;
        let names = [
            ("system_account", &identity.system_account),
            ("application_account", &identity.application_account),
            ("system_user", &identity.system_user),
            ("application_user", &identity.application_user),
        ];
        for (field, name) in names {
            if !is_file_name(name) {
                return Err(Error::Validation(format!(
                    "identity.{} '{}' must be a plain file name",
                    field, name
                )));
            }
        }

        if identity.system_account == identity.application_account {
            return Err(Error::Validation(format!(
                "identity.system_account and identity.application_account are both '{}'",
                identity.system_account
            )));
        }
        if identity.system_user == identity.application_user {
            return Err(Error::Validation(format!(
                "identity.system_user and identity.application_user are both '{}'",
                identity.system_user
            )));
        }
        Ok(())
    }
}

fn is_file_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// `host:port` with a numeric port.
fn is_host_port(target: &str) -> bool {
    match target.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
