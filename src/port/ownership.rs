//! Ownership classification of a busy port.
//!
//! Classification is a pure function of the probe result, the PID the
//! orchestrator last recorded for the service, and the service spec. It never
//! consults live system state; the inspector does that.

use crate::registry::ServiceSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who holds a TCP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// Nothing is listening.
    Free,
    /// The service itself (recorded PID or matching command line).
    ThisService,
    /// Another instance of this orchestrator.
    OtherInfra,
    /// An unrelated process.
    External,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::Free => write!(f, "free"),
            Ownership::ThisService => write!(f, "this_service"),
            Ownership::OtherInfra => write!(f, "other_infra"),
            Ownership::External => write!(f, "external"),
        }
    }
}

impl Ownership {
    /// Short phrase naming the holder, for messages.
    pub fn holder(&self) -> &'static str {
        match self {
            Ownership::Free => "nobody",
            Ownership::ThisService => "a stale instance of the same service",
            Ownership::OtherInfra => "another fleet instance",
            Ownership::External => "an unrelated process",
        }
    }
}

/// Result of inspecting one port at one instant. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub port: u16,
    pub pid: Option<u32>,
    pub command: Option<String>,
    pub ownership: Ownership,
}

impl Probe {
    /// A probe for a port with no listener.
    pub fn free(port: u16) -> Self {
        Self {
            port,
            pid: None,
            command: None,
            ownership: Ownership::Free,
        }
    }

    /// Build a classified probe from the raw listener facts.
    pub fn classified(
        port: u16,
        pid: Option<u32>,
        command: Option<String>,
        expected_pid: Option<u32>,
        spec: &ServiceSpec,
        marker: &str,
    ) -> Self {
        let ownership = classify(pid, command.as_deref(), expected_pid, spec, marker);
        Self {
            port,
            pid,
            command,
            ownership,
        }
    }

    /// "PID 123 (cmd)" style description of the holder.
    pub fn describe_owner(&self) -> String {
        match (self.pid, self.command.as_deref()) {
            (Some(pid), Some(cmd)) if !cmd.is_empty() => format!("PID {} ({})", pid, cmd),
            (Some(pid), _) => format!("PID {}", pid),
            (None, _) => "no process".to_string(),
        }
    }
}

/// Classify the holder of a port.
///
/// 1. no owning PID: `Free`
/// 2. owning PID equals the recorded PID: `ThisService`
/// 3. command line contains the service id or one of its process names: `ThisService`
/// 4. command line contains the orchestrator marker: `OtherInfra`
/// 5. otherwise: `External`
///
/// Rule 3 is a plain substring match, so an unrelated process whose command
/// line happens to contain the id is also treated as the service.
pub fn classify(
    pid: Option<u32>,
    command: Option<&str>,
    expected_pid: Option<u32>,
    spec: &ServiceSpec,
    marker: &str,
) -> Ownership {
    let Some(pid) = pid else {
        return Ownership::Free;
    };

    if expected_pid == Some(pid) {
        return Ownership::ThisService;
    }

    let command = command.unwrap_or_default();
    if command.is_empty() {
        return Ownership::External;
    }

    let matches_identity = command.contains(spec.id.as_str())
        || spec
            .process_names
            .iter()
            .filter(|name| !name.is_empty())
            .any(|name| command.contains(name.as_str()));
    if matches_identity {
        return Ownership::ThisService;
    }

    if !marker.is_empty() && command.contains(marker) {
        return Ownership::OtherInfra;
    }

    Ownership::External
}

/// Render the operator-facing explanation of why a service cannot start.
pub fn format_conflict_message(probe: &Probe, spec: &ServiceSpec, dev_mode: bool) -> String {
    let owner = probe.describe_owner();
    let port = probe.port;
    let kill_hint = probe
        .pid
        .map(|pid| format!("kill {}", pid))
        .unwrap_or_else(|| format!("lsof -i :{}", port));

    match probe.ownership {
        Ownership::Free => format!("Port {} is free.", port),
        Ownership::ThisService if dev_mode => format!(
            "Port {} is still held by a stale '{}' process: {}. It did not release the port after a stop request; stop it manually with `{}` and retry.",
            port, spec.id, owner, kill_hint
        ),
        Ownership::ThisService => format!(
            "Port {} is held by a stale '{}' process: {}. Automatic reclaim only runs in the development environment; stop it with `{}` and retry.",
            port, spec.id, owner, kill_hint
        ),
        Ownership::OtherInfra => format!(
            "Port {} is held by another fleet instance: {}. Stop the sibling instance (run `fleet down` in its project) or change the port configured for '{}'.",
            port, owner, spec.id
        ),
        Ownership::External => format!(
            "Port {} is held by an unrelated process: {}. Free the port (`{}`) or change the port configured for '{}' in fleet.yaml.",
            port, owner, kill_hint, spec.id
        ),
    }
}
