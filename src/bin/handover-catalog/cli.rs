//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use handover::config::{default_config_path, CatalogConfig, ScanPolicy};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Catalog server: signs versioned executables and serves the newest one.
#[derive(Parser, Debug)]
#[command(name = "handover-catalog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, short, env = "HANDOVER_CATALOG_ADDR")]
    pub listen_addr: Option<SocketAddr>,

    /// Directory holding the versioned executables.
    #[arg(long, short, env = "HANDOVER_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// URI prefix for raw artifact downloads.
    #[arg(long, env = "HANDOVER_HTTP_PREFIX")]
    pub http_prefix: Option<String>,

    /// Seconds between directory scans.
    #[arg(long, env = "HANDOVER_SCAN_INTERVAL")]
    pub scan_interval: Option<u64>,

    /// What to do with files that cannot be cataloged.
    #[arg(long, value_enum, env = "HANDOVER_SCAN_POLICY")]
    pub scan_policy: Option<CliScanPolicy>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "HANDOVER_JSON_LOGS")]
    pub json_logs: bool,

    /// Log level, `info` unless set here or in the config file.
    #[arg(long, env = "HANDOVER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Scan policy CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliScanPolicy {
    /// Stop the server on the first bad file.
    FailFast,
    /// Log bad files and keep scanning.
    SkipInvalid,
}

impl Cli {
    /// Convert CLI arguments into a `CatalogConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be loaded or the result is
    /// invalid.
    pub fn into_config(self) -> color_eyre::Result<CatalogConfig> {
        let path = self.config.or_else(|| {
            let default = default_config_path("catalog.toml");
            default.exists().then_some(default)
        });
        let mut config = match path {
            Some(ref path) => CatalogConfig::from_file(path)?,
            None => CatalogConfig::default(),
        };

        if let Some(listen_addr) = self.listen_addr {
            config.listen_addr = listen_addr;
        }
        if let Some(storage_dir) = self.storage_dir {
            config.storage_dir = storage_dir;
        }
        if let Some(http_prefix) = self.http_prefix {
            config.http_prefix = http_prefix;
        }
        if let Some(secs) = self.scan_interval {
            config.scan_interval_secs = secs;
        }
        if let Some(policy) = self.scan_policy {
            config.scan_policy = policy.into();
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl From<CliScanPolicy> for ScanPolicy {
    fn from(p: CliScanPolicy) -> Self {
        match p {
            CliScanPolicy::FailFast => ScanPolicy::FailFast,
            CliScanPolicy::SkipInvalid => ScanPolicy::SkipInvalid,
        }
    }
}
