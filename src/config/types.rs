//! Core configuration types.
//!
//! This module contains the root [`Config`] struct and the proxy and identity
//! sections of the `fleet.yaml` configuration file.

use super::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default port-reclaim polling ceiling.
pub const DEFAULT_RECLAIM_TIMEOUT_MS: u64 = 3000;

fn default_environment() -> String {
    "development".to_string()
}

fn default_marker() -> String {
    "fleet".to_string()
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".fleet")
}

fn default_reclaim_timeout_ms() -> u64 {
    DEFAULT_RECLAIM_TIMEOUT_MS
}

/// Root configuration structure for fleet.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Runtime environment. Port reclaim is only permitted in `development`.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Command-line substring identifying another instance of this orchestrator.
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Persistent state directory (PID ledger, rendered configs, identity).
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// If non-empty, only these service ids are enabled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Service ids that are never enabled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub proxy: ProxySettings,

    #[serde(default)]
    pub identity: IdentitySettings,

    #[serde(default = "default_reclaim_timeout_ms")]
    pub reclaim_timeout_ms: u64,

    /// Services in startup priority order.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            marker: default_marker(),
            store_dir: default_store_dir(),
            include: Vec::new(),
            exclude: Vec::new(),
            proxy: ProxySettings::default(),
            identity: IdentitySettings::default(),
            reclaim_timeout_ms: default_reclaim_timeout_ms(),
            services: Vec::new(),
        }
    }
}

impl Config {
    /// Look up a service entry by id.
    pub fn service(&self, id: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.id == id)
    }
}

fn default_proxy_binary() -> String {
    "caddy".to_string()
}

/// Reverse proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Service whose address is the fallback backend for unmatched paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_service: Option<String>,

    /// Where the rendered Caddyfile is written. Defaults to `<store_dir>/Caddyfile`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,

    #[serde(default = "default_proxy_binary")]
    pub binary: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            root_service: None,
            config_file: None,
            binary: default_proxy_binary(),
        }
    }
}

fn default_operator() -> String {
    "fleet".to_string()
}

fn default_system_account() -> String {
    "SYS".to_string()
}

fn default_application_account() -> String {
    "APP".to_string()
}

fn default_system_user() -> String {
    "sys".to_string()
}

fn default_application_user() -> String {
    "app".to_string()
}

/// Names used when generating the messaging trust chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    /// Artifact directory. Defaults to `<store_dir>/identity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_operator")]
    pub operator: String,

    #[serde(default = "default_system_account")]
    pub system_account: String,

    #[serde(default = "default_application_account")]
    pub application_account: String,

    #[serde(default = "default_system_user")]
    pub system_user: String,

    #[serde(default = "default_application_user")]
    pub application_user: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            dir: None,
            operator: default_operator(),
            system_account: default_system_account(),
            application_account: default_application_account(),
            system_user: default_system_user(),
            application_user: default_application_user(),
        }
    }
}
