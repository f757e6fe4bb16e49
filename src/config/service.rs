//! Service configuration types.
//!
//! This module contains the [`ServiceConfig`] struct describing one entry of
//! the ordered `services` list in fleet.yaml.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Built-in service kinds the registry knows how to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// A plain command run under the supervisor.
    #[default]
    Process,
    /// The reverse proxy fed by the route aggregator.
    Proxy,
    /// The messaging backbone; requires the identity trust chain.
    Messaging,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Process => write!(f, "process"),
            ServiceKind::Proxy => write!(f, "proxy"),
            ServiceKind::Messaging => write!(f, "messaging"),
        }
    }
}

/// A port as written in YAML: either `1337` or `"1337"`.
///
/// An empty string or `0` means the service has no port to police.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Text(String),
}

impl Default for PortValue {
    fn default() -> Self {
        PortValue::Text(String::new())
    }
}

impl PortValue {
    /// Parse into a policed port. `Ok(None)` for "no port".
    pub fn resolve(&self) -> std::result::Result<Option<u16>, String> {
        match self {
            PortValue::Number(0) => Ok(None),
            PortValue::Number(port) => Ok(Some(*port)),
            PortValue::Text(text) => {
                let text = text.trim();
                if text.is_empty() || text == "0" {
                    return Ok(None);
                }
                text.parse::<u16>()
                    .map(Some)
                    .map_err(|_| format!("'{}' is not a valid port", text))
            }
        }
    }
}

/// A path-prefix route contributed to the reverse proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    pub target: String,
}

/// Service configuration for a single entry of the fleet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,

    #[serde(default)]
    pub port: PortValue,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_ports: Vec<PortValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub kind: ServiceKind,

    /// argv of the process to run. Empty for services hosted elsewhere.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Command-line substrings that identify this service's processes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_names: Vec<String>,

    /// Directories created before port inspection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ensure_dirs: Vec<PathBuf>,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    /// Environments in which the service runs. Empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_value_accepts_numbers_and_strings() {
        assert_eq!(PortValue::Number(1337).resolve(), Ok(Some(1337)));
        assert_eq!(PortValue::Text("4195".into()).resolve(), Ok(Some(4195)));
        assert_eq!(PortValue::Text(String::new()).resolve(), Ok(None));
        assert_eq!(PortValue::Text("0".into()).resolve(), Ok(None));
        assert_eq!(PortValue::Number(0).resolve(), Ok(None));
        assert!(PortValue::Text("http".into()).resolve().is_err());
        assert!(PortValue::Text("70000".into()).resolve().is_err());
    }

    #[test]
    fn service_defaults_are_enabled_process() {
        let svc: ServiceConfig = serde_yaml::from_str("id: web").unwrap();
        assert!(svc.enabled);
        assert!(!svc.required);
        assert_eq!(svc.kind, ServiceKind::Process);
        assert_eq!(svc.port.resolve(), Ok(None));
    }
}
