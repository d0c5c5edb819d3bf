//! Dashboard launch configuration.
//!
//! Values come from three layers (highest priority first):
//! 1. command-line flags
//! 2. `~/.dapr/dashboard.json`, when present
//! 3. built-in defaults
//!
//! The kubeconfig resolution chain:
//! 1. Explicit `--kubeconfig` flag
//! 2. `DAPR_KUBECONFIG` environment variable
//! 3. `dashboard.json` `kubeconfig` entry
//! 4. Fall back to kube default (`KUBECONFIG` env / `~/.kube/config`)

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Name of the dashboard service running in the cluster.
pub const DASHBOARD_SERVICE_NAME: &str = "dapr-dashboard";

/// Default host the local end of the port-forward binds to.
pub const DEFAULT_HOST: &str = "localhost";

/// Default local port for the dashboard.
pub const DEFAULT_LOCAL_PORT: u16 = 8080;

/// Port the dashboard pod listens on.
pub const DASHBOARD_REMOTE_PORT: u16 = 8080;

/// Namespaces searched for the dashboard, in priority order.
pub const DEFAULT_NAMESPACES: [&str; 2] = ["dapr-system", "default"];

const CONFIG_DIR_NAME: &str = ".dapr";
const CONFIG_FILE_NAME: &str = "dashboard.json";
const DAPR_KUBECONFIG_ENV: &str = "DAPR_KUBECONFIG";

/// Persisted dashboard overrides read from `~/.dapr/dashboard.json`.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    /// Candidate namespaces, replacing the built-in search order.
    #[serde(default)]
    pub namespaces: Option<Vec<String>>,
    /// Local bind host.
    #[serde(default)]
    pub address: Option<String>,
    /// Local port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Kubeconfig path.
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

/// Path to `~/.dapr/dashboard.json`.
pub fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::command_failed("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load `~/.dapr/dashboard.json`, returning defaults when it is missing.
pub fn load_config() -> Result<DashboardConfig> {
    load_config_from(&config_path()?)
}

fn load_config_from(path: &Path) -> Result<DashboardConfig> {
    if !path.exists() {
        return Ok(DashboardConfig::default());
    }
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::command_failed(format!("failed to read {}: {}", path.display(), e)))?;
    parse_config(&data)
        .map_err(|e| Error::command_failed(format!("failed to parse {}: {}", path.display(), e)))
}

fn parse_config(data: &str) -> std::result::Result<DashboardConfig, serde_json::Error> {
    serde_json::from_str(data)
}

/// Resolve a kubeconfig path using the priority chain.
///
/// Returns `None` to use kube defaults.
pub fn resolve_kubeconfig(explicit: Option<&str>, persisted: &DashboardConfig) -> Option<String> {
    if let Some(path) = explicit {
        return Some(path.to_string());
    }

    if let Ok(path) = std::env::var(DAPR_KUBECONFIG_ENV) {
        if !path.is_empty() {
            return Some(path);
        }
    }

    persisted.kubeconfig.clone().filter(|p| !p.is_empty())
}

/// Everything the launcher needs, resolved once before anything touches the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    pub service_name: String,
    /// Ordered, not deduplicated. First match wins.
    pub candidates: Vec<String>,
    pub local_host: String,
    /// `0` means unset.
    pub local_port: u16,
    pub remote_port: u16,
    pub stream_output: bool,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            service_name: DASHBOARD_SERVICE_NAME.to_string(),
            candidates: DEFAULT_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            local_host: DEFAULT_HOST.to_string(),
            local_port: 0,
            remote_port: DASHBOARD_REMOTE_PORT,
            stream_output: false,
        }
    }
}

impl LaunchConfig {
    /// Merge command-line overrides over persisted settings and defaults.
    ///
    /// An explicit namespace replaces the whole candidate list.
    pub fn from_sources(
        namespace: Option<String>,
        port: Option<u16>,
        address: Option<String>,
        persisted: &DashboardConfig,
    ) -> Self {
        let mut config = Self::default();

        if let Some(namespace) = namespace {
            config.candidates = vec![namespace];
        } else if let Some(namespaces) = persisted.namespaces.as_ref().filter(|n| !n.is_empty()) {
            config.candidates = namespaces.clone();
        }

        if let Some(port) = port.or(persisted.port) {
            config.local_port = port;
        }

        if let Some(address) = address.or_else(|| persisted.address.clone()) {
            config.local_host = address;
        }

        config
    }

    /// Local port after applying the default for "unset".
    pub fn effective_local_port(&self) -> u16 {
        effective_port(self.local_port)
    }

    /// URL the dashboard is reachable at once the port-forward is up.
    pub fn url(&self) -> String {
        dashboard_url(&self.local_host, self.effective_local_port())
    }
}

/// Map an unset (`0`) port to [`DEFAULT_LOCAL_PORT`].
pub fn effective_port(port: u16) -> u16 {
    if port == 0 {
        DEFAULT_LOCAL_PORT
    } else {
        port
    }
}

/// `host:port`, bracketing IPv6 literals.
pub fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// `http://{host}:{port}`
pub fn dashboard_url(host: &str, port: u16) -> String {
    format!("http://{}", authority(host, port))
}
