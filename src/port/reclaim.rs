//! Process termination and port reclaim.
//!
//! Reclaim is advisory: PIDs can be reused and command lines can lie. The
//! sequencer's `blocked` state is the real backstop; a reclaim that does not
//! observe the port free within its bound is reported, never assumed.

use crate::error::{validate_pid, Result};
use std::time::{Duration, Instant};

use super::PortInspector;

/// Interval between port availability checks while reclaiming.
pub const RECLAIM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period between SIGTERM and SIGKILL during shutdown sweeps.
pub const TERMINATE_GRACE: Duration = Duration::from_millis(1500);

/// Signals and process-table queries used by reclaim and shutdown.
pub trait ProcessControl: Send + Sync {
    /// Ask `pid` (or its process group) to exit.
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Force `pid` (or its process group) to exit.
    fn kill(&self, pid: u32) -> Result<()>;

    fn is_alive(&self, pid: u32) -> bool;

    /// PIDs whose command line contains `pattern`, excluding this process.
    fn find_by_pattern(&self, pattern: &str) -> Vec<u32>;
}

/// Outcome of one reclaim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// The port was observed free after `elapsed`.
    Released { elapsed: Duration },
    /// The stop request could not be delivered.
    SignalFailed,
    /// The port was still bound when the bound expired.
    StillOccupied,
}

impl ReclaimOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, ReclaimOutcome::Released { .. })
    }
}

/// Stop `pid` gracefully and poll until `port` is free or `timeout` expires.
pub async fn reclaim_port(
    inspector: &dyn PortInspector,
    control: &dyn ProcessControl,
    port: u16,
    pid: u32,
    timeout: Duration,
) -> ReclaimOutcome {
    if pid == std::process::id() {
        // Never signal ourselves; the port may be a listener we hold.
        tracing::warn!("Refusing to reclaim port {} from own PID {}", port, pid);
        return ReclaimOutcome::SignalFailed;
    }

    if let Err(e) = control.terminate(pid) {
        tracing::warn!("Failed to stop PID {} holding port {}: {}", pid, port, e);
        return ReclaimOutcome::SignalFailed;
    }

    let started = Instant::now();
    let deadline = started + timeout;
    loop {
        if inspector.is_available(port) {
            return ReclaimOutcome::Released {
                elapsed: started.elapsed(),
            };
        }
        if Instant::now() >= deadline {
            return ReclaimOutcome::StillOccupied;
        }
        tokio::time::sleep(RECLAIM_POLL_INTERVAL).await;
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL. Returns whether the process is gone.
pub async fn terminate_and_wait(control: &dyn ProcessControl, pid: u32, grace: Duration) -> bool {
    if !control.is_alive(pid) {
        return true;
    }
    if let Err(e) = control.terminate(pid) {
        tracing::debug!("SIGTERM to PID {} failed: {}", pid, e);
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !control.is_alive(pid) {
            return true;
        }
        tokio::time::sleep(RECLAIM_POLL_INTERVAL).await;
    }

    tracing::warn!(
        "PID {} did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
        pid,
        grace
    );
    if let Err(e) = control.kill(pid) {
        tracing::warn!("SIGKILL to PID {} failed: {}", pid, e);
    }
    tokio::time::sleep(RECLAIM_POLL_INTERVAL).await;
    !control.is_alive(pid)
}

/// Process control via Unix signals and the process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessControl;

impl SystemProcessControl {
    fn signal(pid: u32, sig: nix::sys::signal::Signal) -> Result<()> {
        use nix::sys::signal;
        use nix::unistd::getpgid;

        let nix_pid = validate_pid(pid, "port holder")?;

        // Use killpg() for process group leaders so child processes
        // are also cleaned up.
        let is_group_leader = getpgid(Some(nix_pid)).ok() == Some(nix_pid);
        let sent = if is_group_leader {
            signal::killpg(nix_pid, sig).or_else(|_| signal::kill(nix_pid, sig))
        } else {
            signal::kill(nix_pid, sig)
        };
        sent.map_err(|e| crate::error::Error::Process(format!("{:?} to PID {}: {}", sig, pid, e)))
    }
}

impl ProcessControl for SystemProcessControl {
    fn terminate(&self, pid: u32) -> Result<()> {
        Self::signal(pid, nix::sys::signal::Signal::SIGTERM)
    }

    fn kill(&self, pid: u32) -> Result<()> {
        Self::signal(pid, nix::sys::signal::Signal::SIGKILL)
    }

    fn is_alive(&self, pid: u32) -> bool {
        crate::error::is_pid_alive(pid)
    }

    fn find_by_pattern(&self, pattern: &str) -> Vec<u32> {
        if pattern.is_empty() {
            return Vec::new();
        }
        let own_pid = std::process::id();
        let mut pids: Vec<u32> = list_command_lines()
            .into_iter()
            .filter(|(pid, cmd)| *pid != own_pid && cmd.contains(pattern))
            .map(|(pid, _)| pid)
            .collect();
        pids.sort_unstable();
        pids
    }
}

/// All visible processes with their command lines.
#[cfg(target_os = "linux")]
fn list_command_lines() -> Vec<(u32, String)> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| super::command_line(pid).map(|cmd| (pid, cmd)))
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn list_command_lines() -> Vec<(u32, String)> {
    let Ok(output) = std::process::Command::new("ps")
        .args(["-axo", "pid=,command="])
        .output()
    else {
        return Vec::new();
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, cmd) = line.split_once(' ')?;
            Some((pid.parse().ok()?, cmd.trim().to_string()))
        })
        .collect()
}
