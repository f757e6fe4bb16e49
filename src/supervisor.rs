//! Child process supervision.
//!
//! Every child runs in its own process group so stop signals reach the whole
//! tree. Output is forwarded line by line into tracing under the service id.

use crate::error::{validate_pid, Error, Result};
use nix::sys::signal::{self, killpg, Signal};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

/// Grace period between SIGTERM and SIGKILL when stopping a child.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long to wait for the kernel to reap a child after SIGKILL.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// argv, environment and working directory of a child.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Default::default()
        }
    }
}

/// Handle to one supervised child. Clones observe the same exit.
#[derive(Debug, Clone)]
pub struct Supervised {
    pub pid: u32,
    exit: watch::Receiver<Option<ExitStatus>>,
}

impl Supervised {
    /// Wait for the child to exit. `None` if the exit status was lost.
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        match self.exit.wait_for(|status| status.is_some()).await {
            Ok(status) => *status,
            Err(_) => None,
        }
    }

    /// Exit status if the child already exited.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit.borrow()
    }
}

/// Spawns, tracks and stops child processes by service id.
pub struct Supervisor {
    children: Mutex<HashMap<String, Supervised>>,
    grace_period: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            grace_period,
        }
    }

    /// Spawn `command` for service `id` in a new process group.
    pub fn spawn(&self, id: &str, command: &CommandSpec) -> Result<Supervised> {
        let (program, args) = command
            .argv
            .split_first()
            .ok_or_else(|| Error::StartFailed(id.to_string(), "empty command".to_string()))?;

        tracing::debug!(
            "Spawning '{}': {:?} (cwd: {:?})",
            id,
            command.argv,
            command.cwd
        );

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .process_group(0);
        if let Some(ref cwd) = command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::StartFailed(id.to_string(), format!("{}: {}", program, e)))?;
        let pid = child.id().ok_or_else(|| {
            Error::StartFailed(id.to_string(), "process exited before reporting a PID".into())
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(id.to_string(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(id.to_string(), "stderr", stderr));
        }

        let (tx, rx) = watch::channel(None);
        let service = id.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    tracing::debug!("'{}' (PID {}) exited: {}", service, pid, status);
                    let _ = tx.send(Some(status));
                }
                Err(e) => {
                    tracing::warn!("Error waiting for '{}' (PID {}): {}", service, pid, e);
                }
            }
        });

        let handle = Supervised { pid, exit: rx };
        if let Some(previous) = self.children.lock().insert(id.to_string(), handle.clone()) {
            tracing::warn!(
                "'{}' was already tracked as PID {}, replacing",
                id,
                previous.pid
            );
        }
        Ok(handle)
    }

    pub fn pid(&self, id: &str) -> Option<u32> {
        self.children.lock().get(id).map(|c| c.pid)
    }

    /// Resolve when the child tracked as `id` exits. `None` if untracked.
    pub async fn wait(&self, id: &str) -> Option<ExitStatus> {
        let mut handle = self.children.lock().get(id).cloned()?;
        handle.wait().await
    }

    /// Tracked children as `(id, pid)`, sorted by id.
    pub fn tracked(&self) -> Vec<(String, u32)> {
        let mut tracked: Vec<_> = self
            .children
            .lock()
            .iter()
            .map(|(id, c)| (id.clone(), c.pid))
            .collect();
        tracked.sort();
        tracked
    }

    /// SIGTERM the child's group, wait the grace period, then SIGKILL.
    ///
    /// Returns false when `id` was not tracked.
    pub async fn stop(&self, id: &str) -> bool {
        let Some(mut handle) = self.children.lock().remove(id) else {
            return false;
        };
        if handle.exit_status().is_some() {
            return true;
        }

        let pid = match validate_pid(handle.pid, id) {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!("Not stopping '{}': {}", id, e);
                return true;
            }
        };

        let sent = killpg(pid, Signal::SIGTERM).or_else(|_| signal::kill(pid, Signal::SIGTERM));
        if sent.is_err() {
            // Group already gone.
            return true;
        }

        match tokio::time::timeout(self.grace_period, handle.wait()).await {
            Ok(_) => tracing::debug!("'{}' exited gracefully", id),
            Err(_) => {
                tracing::warn!(
                    "'{}' did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
                    id,
                    self.grace_period
                );
                let _ = killpg(pid, Signal::SIGKILL).or_else(|_| signal::kill(pid, Signal::SIGKILL));
                let _ = tokio::time::timeout(KILL_REAP_TIMEOUT, handle.wait()).await;
            }
        }
        true
    }

    /// Stop every tracked child.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.children.lock().keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }
}

async fn forward_output<R>(service: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "fleet::service", service = %service, stream, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new(vec!["sh".into(), "-c".into(), script.into()])
    }

    #[tokio::test]
    async fn spawn_and_stop_tracks_child() {
        let supervisor = Supervisor::with_grace_period(Duration::from_secs(2));
        let mut handle = supervisor.spawn("sleeper", &sh("sleep 30")).unwrap();
        assert_eq!(supervisor.pid("sleeper"), Some(handle.pid));

        assert!(supervisor.stop("sleeper").await);
        let status = handle.wait().await.expect("exit status");
        assert!(!status.success());
        assert!(supervisor.pid("sleeper").is_none());
        assert!(!supervisor.stop("sleeper").await);
    }

    #[tokio::test]
    async fn sigkill_after_grace_when_term_is_ignored() {
        let supervisor = Supervisor::with_grace_period(Duration::from_millis(300));
        let mut handle = supervisor
            .spawn("stubborn", &sh("trap '' TERM; sleep 30"))
            .unwrap();
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        supervisor.stop("stubborn").await;
        assert!(handle.wait().await.is_some());
    }

    #[tokio::test]
    async fn exit_is_observed() {
        let supervisor = Supervisor::new();
        let mut handle = supervisor.spawn("once", &sh("exit 3")).unwrap();
        let status = handle.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(supervisor.wait("once").await.and_then(|s| s.code()), Some(3));
        assert!(supervisor.wait("unknown").await.is_none());
    }

    #[tokio::test]
    async fn empty_command_fails() {
        let supervisor = Supervisor::new();
        let err = supervisor.spawn("nothing", &CommandSpec::default()).unwrap_err();
        assert!(matches!(err, Error::StartFailed(ref id, _) if id == "nothing"));
    }

    #[tokio::test]
    async fn stop_all_clears_tracking() {
        let supervisor = Supervisor::with_grace_period(Duration::from_secs(2));
        supervisor.spawn("a", &sh("sleep 30")).unwrap();
        supervisor.spawn("b", &sh("sleep 30")).unwrap();
        assert_eq!(supervisor.tracked().len(), 2);
        supervisor.stop_all().await;
        assert!(supervisor.tracked().is_empty());
    }
}
