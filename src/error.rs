// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use crate::port::Ownership;
use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(fleet::config::validation),
        help("Run `fleet validate` for detailed validation errors")
    )]
    Validation(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Filesystem error: {0}")]
    #[diagnostic(code(fleet::filesystem::error))]
    Filesystem(String),

    #[error("Duplicate service id: {0}")]
    #[diagnostic(
        code(fleet::registry::duplicate),
        help("Service ids must be unique in fleet.yaml")
    )]
    DuplicateService(String),

    #[error("Port inspection failed for port {port}: {reason}")]
    #[diagnostic(
        code(fleet::port::inspection),
        help("Install `ss` (iproute2) or `lsof` so listening sockets can be attributed to processes")
    )]
    Inspection { port: u16, reason: String },

    #[error("Service '{service}' is blocked: port {port} is held by {}{}",
        .ownership,
        .pid.map(|pid| format!(" (PID {})", pid)).unwrap_or_default()
    )]
    #[diagnostic(code(fleet::port::blocked))]
    PortBlocked {
        service: String,
        port: u16,
        ownership: Ownership,
        pid: Option<u32>,
        command: Option<String>,
        message: String,
    },

    #[error("Service '{0}' failed to prepare: {1}")]
    #[diagnostic(
        code(fleet::service::ensure_failed),
        help("Check that the directories declared in ensure_dirs are writable")
    )]
    EnsureFailed(String, String),

    #[error("Service '{0}' failed to start: {1}")]
    #[diagnostic(
        code(fleet::service::start_failed),
        help("Verify the command exists and is executable")
    )]
    StartFailed(String, String),

    #[error("{} service(s) failed: {}", .0.len(), .0.iter().map(|(id, msg)| format!("{} ({})", id, msg)).collect::<Vec<_>>().join(", "))]
    ServicesFailed(Vec<(String, String)>),

    #[error("Process error: {0}")]
    #[diagnostic(
        code(fleet::process::error),
        help("Check that the command exists and is executable")
    )]
    Process(String),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("Identity artifact missing: {0}")]
    #[diagnostic(
        code(fleet::identity::missing),
        help("Remove the identity directory to regenerate the whole trust chain")
    )]
    IdentityMissing(String),

    #[error("Identity artifact malformed: {0}")]
    #[diagnostic(
        code(fleet::identity::malformed),
        help("Remove the identity directory to regenerate the whole trust chain")
    )]
    IdentityMalformed(String),

    #[error("Invalid nkey: {0}")]
    Nkey(String),

    #[error("Proxy error: {0}")]
    #[diagnostic(
        code(fleet::proxy::error),
        help("Check that caddy is installed and its admin endpoint is reachable")
    )]
    Proxy(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::PortBlocked { message, .. } => Some(message.clone()),
            Error::Inspection { port, .. } => Some(format!(
                "Find what's using the port with: lsof -i :{} (macOS/Linux)",
                port
            )),
            Error::Config(msg) if msg.contains("Could not find") => Some(
                "Create a fleet.yaml in the project root or pass --config <path>".to_string(),
            ),
            Error::Config(_) | Error::Validation(_) | Error::DuplicateService(_) => {
                Some("Validate your config with: fleet validate".to_string())
            }
            Error::IdentityMissing(_) | Error::IdentityMalformed(_) | Error::Nkey(_) => Some(
                "The trust chain is incomplete. Delete the identity directory and run `fleet identity` to regenerate it.".to_string(),
            ),
            Error::ServicesFailed(failed) => Some(format!(
                "Inspect the log output above for: {}",
                failed
                    .iter()
                    .map(|(id, _)| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            Error::Process(_) | Error::StartFailed(..) => {
                Some("Check that the command exists and is executable".to_string())
            }
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
pub fn validate_pid(pid: u32, service_name: &str) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID 0 is invalid for service '{}' (refers to process group, not a process)",
                service_name
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "refusing to operate on PID 1 (init) for service '{}'",
                service_name
            ),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID {} exceeds i32::MAX for service '{}', cannot convert safely",
                pid, service_name
            ),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}

/// Same as validate_pid but without the PID 1 refusal, for read-only checks.
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}

/// Check whether a PID refers to a live process (signal 0 probe).
pub fn is_pid_alive(pid: u32) -> bool {
    match validate_pid_for_check(pid) {
        Some(pid) => nix::sys::signal::kill(pid, None).is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_pid_rejects_zero_and_init() {
        assert!(validate_pid(0, "svc").is_err());
        assert!(validate_pid(1, "svc").is_err());
        assert!(validate_pid(u32::MAX, "svc").is_err());
        assert!(validate_pid(4242, "svc").is_ok());
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
        assert!(!is_pid_alive(0));
    }

    #[test]
    fn blocked_error_carries_remedy_as_hint() {
        let err = Error::PortBlocked {
            service: "web".to_string(),
            port: 8090,
            ownership: Ownership::External,
            pid: Some(321),
            command: Some("python -m http.server".to_string()),
            message: "free the port".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("web"));
        assert!(text.contains("8090"));
        assert!(text.contains("PID 321"));
        assert!(err.with_suggestion().contains("Hint: free the port"));
    }

    #[test]
    fn services_failed_lists_every_service() {
        let err = Error::ServicesFailed(vec![
            ("db".to_string(), "boom".to_string()),
            ("mail".to_string(), "bang".to_string()),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 service(s) failed"));
        assert!(text.contains("db (boom)"));
        assert!(text.contains("mail (bang)"));
    }
}
