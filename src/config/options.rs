//! Runtime options derived from [`Config`] plus command-line overrides.

use super::{Config, IdentitySettings};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment name in which automatic port reclaim is permitted.
pub const DEVELOPMENT: &str = "development";

/// Runtime view of the configuration used for one orchestration run.
///
/// Specs are re-derived from `Options` on every run; nothing here is
/// mutated once a session has started.
#[derive(Debug, Clone)]
pub struct Options {
    pub environment: String,
    pub marker: String,
    /// Base directory relative paths in the config are resolved against.
    pub work_dir: PathBuf,
    pub store_dir: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub reclaim_timeout: Duration,
    pub proxy_root_service: Option<String>,
    pub proxy_config_file: PathBuf,
    pub proxy_binary: String,
    pub identity: IdentitySettings,
    pub identity_dir: PathBuf,
}

impl Options {
    /// Build options from a parsed config rooted at `work_dir`.
    pub fn from_config(config: &Config, work_dir: &Path) -> Self {
        let store_dir = resolve(work_dir, &config.store_dir);
        let proxy_config_file = config
            .proxy
            .config_file
            .as_ref()
            .map(|p| resolve(work_dir, p))
            .unwrap_or_else(|| store_dir.join("Caddyfile"));
        let identity_dir = config
            .identity
            .dir
            .as_ref()
            .map(|p| resolve(work_dir, p))
            .unwrap_or_else(|| store_dir.join("identity"));

        Self {
            environment: config.environment.clone(),
            marker: config.marker.clone(),
            work_dir: work_dir.to_path_buf(),
            store_dir,
            include: config.include.clone(),
            exclude: config.exclude.clone(),
            reclaim_timeout: Duration::from_millis(config.reclaim_timeout_ms),
            proxy_root_service: config.proxy.root_service.clone(),
            proxy_config_file,
            proxy_binary: config.proxy.binary.clone(),
            identity: config.identity.clone(),
            identity_dir,
        }
    }

    /// Apply `--only` / `--skip` style filters on top of the config's own.
    pub fn with_filters(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.include.extend(include);
        self.exclude.extend(exclude);
        self
    }

    /// Override the environment (e.g. from `--env`).
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Whether stale same-service processes may be reclaimed automatically.
    pub fn dev_mode(&self) -> bool {
        self.environment == DEVELOPMENT
    }

    /// Evaluate the include/exclude filters for a service id.
    pub fn allows(&self, id: &str) -> bool {
        if self.exclude.iter().any(|e| e == id) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|i| i == id)
    }

    /// Location of the persisted PID ledger.
    pub fn pid_ledger_path(&self) -> PathBuf {
        self.store_dir.join("pids.json")
    }

    /// Resolve a path from the config against the work directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        resolve(&self.work_dir, path)
    }
}

impl Default for Options {
    fn default() -> Self {
        let work_dir = std::env::current_dir()
            .or_else(|_| dirs::home_dir().ok_or(()))
            .unwrap_or_else(|_| PathBuf::from("."));
        Self::from_config(&Config::default(), &work_dir)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
