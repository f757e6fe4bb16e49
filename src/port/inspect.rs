use crate::error::{Error, Result};
use crate::registry::ServiceSpec;
use std::collections::HashSet;
use std::process::Command;

use super::Probe;

/// A process holding a listening socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub command: Option<String>,
}

/// Read-only view of which process listens on a TCP port.
///
/// The sequencer only talks to this trait so tests can script port state.
pub trait PortInspector: Send + Sync {
    /// Whether the port can be bound right now.
    fn is_available(&self, port: u16) -> bool;

    /// The process listening on `port`, or `None` when nothing listens.
    ///
    /// Errors mean the state is unknown (tooling missing, owner hidden).
    fn listener(&self, port: u16) -> Result<Option<ProcessInfo>>;
}

/// Inspect a port and classify its holder for `spec`.
pub fn inspect(
    inspector: &dyn PortInspector,
    port: u16,
    expected_pid: Option<u32>,
    spec: &ServiceSpec,
    marker: &str,
) -> Result<Probe> {
    match inspector.listener(port)? {
        None => Ok(Probe::free(port)),
        Some(owner) => {
            let command = owner.command.or(Some(owner.name));
            Ok(Probe::classified(
                port,
                Some(owner.pid),
                command,
                expected_pid,
                spec,
                marker,
            ))
        }
    }
}

/// Inspector backed by bind attempts plus `ss`/`lsof` process enumeration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInspector;

impl PortInspector for SystemInspector {
    fn is_available(&self, port: u16) -> bool {
        is_port_available(port)
    }

    fn listener(&self, port: u16) -> Result<Option<ProcessInfo>> {
        if is_port_available(port) {
            return Ok(None);
        }

        let processes = find_processes_on_port(port)?;
        let own_pid = std::process::id();
        // Prefer a foreign holder; we may be holding the port ourselves.
        let owner = processes
            .iter()
            .find(|p| p.pid != own_pid)
            .or_else(|| processes.first())
            .cloned();

        match owner {
            Some(owner) => {
                tracing::debug!(
                    "Port {} held by PID {} ({})",
                    port,
                    owner.pid,
                    owner.command.as_deref().unwrap_or(&owner.name)
                );
                Ok(Some(owner))
            }
            None => Err(Error::Inspection {
                port,
                reason: "port is in use but its owner could not be resolved".to_string(),
            }),
        }
    }
}

/// Check if a port is available (can bind to it)
///
/// On macOS, binding to 127.0.0.1 can succeed even when 0.0.0.0 is in use,
/// so both are checked.
pub fn is_port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
        && std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Find ALL processes listening on a port (cross-platform).
///
/// Errors only when no enumeration tool could be run at all.
fn find_processes_on_port(port: u16) -> Result<Vec<ProcessInfo>> {
    let mut tool_ran = false;
    let mut processes = Vec::new();

    #[cfg(target_os = "linux")]
    {
        if let Some(found) = find_processes_ss(port) {
            tool_ran = true;
            processes = found;
        }
    }

    if let Some(found) = find_processes_lsof(port) {
        tool_ran = true;
        let seen: HashSet<u32> = processes.iter().map(|p| p.pid).collect();
        processes.extend(found.into_iter().filter(|p| !seen.contains(&p.pid)));
    }

    if !tool_ran {
        return Err(Error::Inspection {
            port,
            reason: "neither `ss` nor `lsof` could be executed".to_string(),
        });
    }

    Ok(processes)
}

#[cfg(target_os = "linux")]
fn find_processes_ss(port: u16) -> Option<Vec<ProcessInfo>> {
    let output = Command::new("ss")
        .args(["-tlnpH", &format!("sport = :{}", port)])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let processes = parse_ss_output(&stdout)
        .into_iter()
        .map(|pid| ProcessInfo {
            pid,
            name: process_name(pid).unwrap_or_else(|| "unknown".to_string()),
            command: command_line(pid),
        })
        .collect();
    Some(processes)
}

/// Extract PIDs from `ss -p` output (`users:(("nats-server",pid=812,fd=7))`).
pub(crate) fn parse_ss_output(stdout: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    let mut seen = HashSet::new();

    for line in stdout.lines() {
        // ss can report multiple pids per line
        for part in line.split(|c| c == ',' || c == '(' || c == ')') {
            if let Some(pid) = part.trim().strip_prefix("pid=").and_then(|p| p.parse::<u32>().ok()) {
                if seen.insert(pid) {
                    pids.push(pid);
                }
            }
        }
    }

    pids
}

fn find_processes_lsof(port: u16) -> Option<Vec<ProcessInfo>> {
    let output = Command::new("lsof")
        .args([
            &format!("-iTCP:{}", port),
            "-sTCP:LISTEN",
            "-P",
            "-n",
            "-F",
            "pc",
        ])
        .output()
        .ok()?;

    // lsof exits 1 when nothing matched; that still counts as a successful run.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let processes = parse_lsof_output(&stdout)
        .into_iter()
        .map(|mut info| {
            info.command = command_line(info.pid).or(info.command);
            info
        })
        .collect();
    Some(processes)
}

/// Parse lsof field output (`pPID` starts a block, `cCOMMAND` names it).
pub(crate) fn parse_lsof_output(stdout: &str) -> Vec<ProcessInfo> {
    let mut processes = Vec::new();
    let mut seen_pids = HashSet::new();
    let mut current_pid: Option<u32> = None;
    let mut current_command: Option<String> = None;

    let mut flush = |pid: Option<u32>, command: Option<String>, out: &mut Vec<ProcessInfo>| {
        if let Some(pid) = pid {
            if seen_pids.insert(pid) {
                out.push(ProcessInfo {
                    pid,
                    name: command.clone().unwrap_or_else(|| "unknown".to_string()),
                    command,
                });
            }
        }
    };

    for line in stdout.lines() {
        if let Some(stripped) = line.strip_prefix('p') {
            flush(current_pid.take(), current_command.take(), &mut processes);
            current_pid = stripped.parse::<u32>().ok();
        } else if let Some(stripped) = line.strip_prefix('c') {
            current_command = Some(stripped.to_string());
        }
    }
    flush(current_pid, current_command, &mut processes);

    processes
}

/// Short process name of `pid`.
pub fn process_name(pid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string(format!("/proc/{}/comm", pid))
            .ok()
            .map(|s| s.trim().to_string())
    }

    #[cfg(not(target_os = "linux"))]
    {
        ps_field(pid, "comm=")
    }
}

/// Full command line of `pid`, space separated.
pub fn command_line(pid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read(format!("/proc/{}/cmdline", pid))
            .ok()
            .map(|raw| {
                String::from_utf8_lossy(&raw)
                    .replace('\0', " ")
                    .trim()
                    .to_string()
            })
            .filter(|s| !s.is_empty())
    }

    #[cfg(not(target_os = "linux"))]
    {
        ps_field(pid, "command=")
    }
}

#[cfg(not(target_os = "linux"))]
fn ps_field(pid: u32, field: &str) -> Option<String> {
    let output = Command::new("ps")
        .args(["-o", field, "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}
