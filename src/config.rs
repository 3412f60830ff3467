//! Configuration for the catalog server and the self-updating node.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a directory scan does when one file cannot be cataloged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    /// Abort the scan and surface the error (the catalog server stops).
    #[default]
    FailFast,
    /// Log the offending file and continue with the next one.
    SkipInvalid,
}

/// Catalog server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Address the distribution endpoint listens on.
    #[serde(default = "default_catalog_addr")]
    pub listen_addr: SocketAddr,

    /// Directory holding the versioned executables.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// URI prefix under which raw artifacts are served.
    #[serde(default = "default_http_prefix")]
    pub http_prefix: String,

    /// Seconds between directory scans.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Behaviour on per-file scan errors.
    #[serde(default)]
    pub scan_policy: ScanPolicy,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Self-updating node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address the service listens on. Shared with the next generation.
    #[serde(default = "default_node_addr")]
    pub listen_addr: SocketAddr,

    /// Upgrade configuration.
    #[serde(default)]
    pub upgrade: UpgradeConfig,

    /// Directory for per-version log files. Logs go to stderr when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Auto-upgrade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Enable automatic upgrades.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the distribution endpoint.
    #[serde(default = "default_check_url")]
    pub check_url: String,

    /// Check interval in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_catalog_addr(),
            storage_dir: default_storage_dir(),
            http_prefix: default_http_prefix(),
            scan_interval_secs: default_scan_interval(),
            scan_policy: ScanPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_node_addr(),
            upgrade: UpgradeConfig::default(),
            log_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_url: default_check_url(),
            check_interval_secs: default_check_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_catalog_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_node_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_http_prefix() -> String {
    "/data".to_string()
}

fn default_check_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_scan_interval() -> u64 {
    2
}

const fn default_check_interval() -> u64 {
    10
}

const fn default_request_timeout() -> u64 {
    30
}

/// Default location of a named config file, e.g. `node.toml`.
///
/// Falls back to the working directory when no platform config dir exists.
#[must_use]
pub fn default_config_path(file_name: &str) -> PathBuf {
    directories::ProjectDirs::from("", "", "handover")
        .map(|dirs| dirs.config_dir().join(file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
}

fn save_toml<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(value).map_err(|e| Error::Config(e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}

impl CatalogConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        save_toml(self, path)
    }

    /// Check invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a zero scan interval or a relative prefix.
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            return Err(Error::Config("scan_interval_secs must be positive".to_string()));
        }
        // The router nests under the prefix without its trailing slashes.
        let prefix = self.http_prefix.trim_end_matches('/');
        if !prefix.starts_with('/') || prefix.len() < 2 {
            return Err(Error::Config(format!(
                "http_prefix must be an absolute, non-root path: {:?}",
                self.http_prefix
            )));
        }
        Ok(())
    }

    /// Time between directory scans.
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        save_toml(self, path)
    }

    /// Check invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the upgrade section is invalid.
    pub fn validate(&self) -> Result<()> {
        self.upgrade.validate()
    }
}

impl UpgradeConfig {
    /// Check invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on zero intervals or an unparseable URL.
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(Error::Config("check_interval_secs must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".to_string()));
        }
        url::Url::parse(&self.check_url)
            .map_err(|e| Error::Config(format!("invalid check_url {:?}: {e}", self.check_url)))?;
        Ok(())
    }

    /// Time between update checks.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Deadline for each request to the distribution endpoint.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
