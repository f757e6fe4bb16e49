//! Built-in hooks for the `process`, `proxy` and `messaging` service kinds.

use super::{Cleanup, Preparer, ServiceContext, Started, Starter};
use crate::error::{Error, Result};
use crate::supervisor::{CommandSpec, Supervised};
use crate::{identity, proxy, state};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// A child that exits within this window after spawn counts as a failed start.
const STARTUP_SETTLE: Duration = Duration::from_millis(200);

/// Creates directories before the service's ports are inspected.
#[derive(Debug, Clone)]
pub struct DirPreparer {
    dirs: Vec<PathBuf>,
}

impl DirPreparer {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl Preparer for DirPreparer {
    async fn ensure(&self, ctx: &ServiceContext) -> Result<()> {
        for dir in &self.dirs {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::EnsureFailed(ctx.id().to_string(), format!("{}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

/// Runs a configured command under the supervisor.
#[derive(Debug, Clone)]
pub struct ProcessStarter {
    command: CommandSpec,
}

impl ProcessStarter {
    pub fn new(argv: Vec<String>, env: BTreeMap<String, String>, cwd: Option<PathBuf>) -> Self {
        Self {
            command: CommandSpec { argv, env, cwd },
        }
    }
}

#[async_trait]
impl Starter for ProcessStarter {
    async fn start(&self, ctx: &ServiceContext) -> Result<Started> {
        launch(ctx, &self.command).await
    }
}

/// Renders the aggregated routes and runs the reverse proxy on them.
#[derive(Debug, Clone)]
pub struct ProxyStarter {
    command: CommandSpec,
}

impl ProxyStarter {
    /// An empty `argv` runs `<proxy binary> run --config <file> --adapter caddyfile`.
    pub fn new(argv: Vec<String>, env: BTreeMap<String, String>, cwd: Option<PathBuf>) -> Self {
        Self {
            command: CommandSpec { argv, env, cwd },
        }
    }
}

#[async_trait]
impl Starter for ProxyStarter {
    async fn start(&self, ctx: &ServiceContext) -> Result<Started> {
        let options = &ctx.options;
        let config = proxy::aggregate(&ctx.specs, options.proxy_root_service.as_deref())
            .ok_or_else(|| {
                Error::Proxy(format!("proxy service '{}' has no listen port", ctx.id()))
            })?;
        let path = &options.proxy_config_file;
        state::write_atomic(path, proxy::render_caddyfile(&config).as_bytes())?;
        tracing::info!(
            "Proxy config written to {} ({} routes)",
            path.display(),
            config.routes.len()
        );

        let mut command = self.command.clone();
        if command.argv.is_empty() {
            command.argv = vec![
                options.proxy_binary.clone(),
                "run".to_string(),
                "--config".to_string(),
                path.display().to_string(),
                "--adapter".to_string(),
                "caddyfile".to_string(),
            ];
        }
        launch(ctx, &command).await
    }
}

/// Bootstraps the identity trust chain, renders the server config and runs
/// the messaging server on it.
#[derive(Debug, Clone)]
pub struct MessagingStarter {
    command: CommandSpec,
}

impl MessagingStarter {
    /// `-c <config>` is appended to `argv`.
    pub fn new(argv: Vec<String>, env: BTreeMap<String, String>, cwd: Option<PathBuf>) -> Self {
        Self {
            command: CommandSpec { argv, env, cwd },
        }
    }
}

#[async_trait]
impl Starter for MessagingStarter {
    async fn start(&self, ctx: &ServiceContext) -> Result<Started> {
        let dir = ctx.options.identity_dir.clone();
        let settings = ctx.options.identity.clone();
        let cancel = ctx.cancel.clone();
        let artifacts =
            tokio::task::spawn_blocking(move || identity::ensure(&dir, &settings, &cancel))
                .await
                .map_err(|e| {
                    Error::StartFailed(ctx.id().to_string(), format!("identity task failed: {}", e))
                })??;
        tracing::info!(
            "Identity ready: operator {}, application account {}",
            artifacts.operator_id,
            artifacts.application_account_id
        );

        let conf = ctx
            .options
            .store_dir
            .join("messaging")
            .join(format!("{}.conf", ctx.id()));
        let rendered = identity::render_server_config(&artifacts, ctx.spec.port);
        state::write_atomic(&conf, rendered.as_bytes())?;

        let mut command = self.command.clone();
        command.argv.push("-c".to_string());
        command.argv.push(conf.display().to_string());
        launch(ctx, &command).await
    }
}

/// Spawn, confirm the child survives startup, and watch it for unexpected exit.
async fn launch(ctx: &ServiceContext, command: &CommandSpec) -> Result<Started> {
    let id = ctx.id().to_string();
    let mut handle = ctx.supervisor.spawn(&id, command)?;

    if let Ok(status) = tokio::time::timeout(STARTUP_SETTLE, handle.wait()).await {
        ctx.supervisor.stop(&id).await;
        return Err(Error::StartFailed(
            id,
            format!("exited during startup ({})", describe_exit(status)),
        ));
    }

    watch_exit(ctx, handle.clone());

    let supervisor = ctx.supervisor.clone();
    let cleanup = Cleanup::new(move || async move {
        supervisor.stop(&id).await;
    });
    Ok(Started::with_pid(handle.pid, cleanup))
}

/// Background unit: records an unexpected exit, cancelling everything when
/// the service is required.
fn watch_exit(ctx: &ServiceContext, mut handle: Supervised) {
    let cancel = ctx.cancel.clone();
    let errors = ctx.errors.clone();
    let required = ctx.spec.required;
    let id = ctx.id().to_string();
    let pid = handle.pid;

    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            status = handle.wait() => {
                if cancel.is_cancelled() {
                    return;
                }
                let err = Error::Process(format!(
                    "'{}' (PID {}) exited unexpectedly ({})",
                    id,
                    pid,
                    describe_exit(status)
                ));
                if required {
                    errors.fatal(&err);
                } else {
                    errors.record(&err);
                }
            }
        }
    });
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unavailable".to_string(),
    }
}
