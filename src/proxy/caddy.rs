use super::ProxyConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound on one `caddy reload` invocation.
const RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Render the Caddyfile for `config`. Output depends only on `config`.
pub fn render_caddyfile(config: &ProxyConfig) -> String {
    let mut out = String::from("# Generated by fleet. Changes are overwritten.\n");
    out.push_str(&format!(":{} {{\n", config.listen_port));
    for route in &config.routes {
        out.push_str(&format!(
            "\thandle {} {{\n\t\treverse_proxy {}\n\t}}\n\n",
            route.path, route.target
        ));
    }
    match config.root_target {
        Some(ref root) => {
            out.push_str(&format!("\thandle {{\n\t\treverse_proxy {}\n\t}}\n", root));
        }
        None => out.push_str("\thandle {\n\t\trespond \"no root service\" 502\n\t}\n"),
    }
    out.push_str("}\n");
    out
}

/// Tells a running proxy to pick up a new configuration file.
#[async_trait]
pub trait ProxyReloader: Send + Sync {
    async fn reload(&self, config_file: &Path) -> Result<()>;
}

/// Live reload through `caddy reload`; the proxy keeps serving throughout.
#[derive(Debug, Clone)]
pub struct CaddyReloader {
    binary: String,
}

impl CaddyReloader {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for CaddyReloader {
    fn default() -> Self {
        Self::new("caddy")
    }
}

#[async_trait]
impl ProxyReloader for CaddyReloader {
    async fn reload(&self, config_file: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("reload")
            .arg("--config")
            .arg(config_file)
            .args(["--adapter", "caddyfile"])
            .kill_on_drop(true);

        let output = tokio::time::timeout(RELOAD_TIMEOUT, cmd.output())
            .await
            .map_err(|_| Error::Proxy(format!("{} reload timed out", self.binary)))?
            .map_err(|e| Error::Proxy(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Proxy(format!(
                "{} reload exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }
        tracing::debug!("Proxy reloaded from {}", config_file.display());
        Ok(())
    }
}
