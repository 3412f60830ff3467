//! Command-line interface definition.

use clap::Parser;
use handover::config::{default_config_path, NodeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Self-updating HTTP service that hands its address to newer versions of
/// itself.
#[derive(Parser, Debug)]
#[command(name = "handover-node")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, short, env = "HANDOVER_LISTEN_ADDR")]
    pub listen_addr: Option<SocketAddr>,

    /// Base URL of the distribution endpoint.
    #[arg(long, env = "HANDOVER_CHECK_URL")]
    pub check_url: Option<String>,

    /// Seconds between update checks.
    #[arg(long, env = "HANDOVER_CHECK_INTERVAL")]
    pub check_interval: Option<u64>,

    /// Per-request timeout in seconds for the distribution endpoint.
    #[arg(long, env = "HANDOVER_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// Disable automatic upgrades.
    #[arg(long, env = "HANDOVER_NO_UPGRADE")]
    pub no_upgrade: bool,

    /// Directory for per-version log files (stderr when unset).
    #[arg(long, env = "HANDOVER_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

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

impl Cli {
    /// Convert CLI arguments into a `NodeConfig`.
    ///
    /// Without `--config`, `node.toml` in the platform config directory is
    /// used when it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be loaded or the result is
    /// invalid.
    pub fn into_config(self) -> color_eyre::Result<NodeConfig> {
        let path = self.config.or_else(|| {
            let default = default_config_path("node.toml");
            default.exists().then_some(default)
        });
        let mut config = match path {
            Some(ref path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(listen_addr) = self.listen_addr {
            config.listen_addr = listen_addr;
        }
        if let Some(check_url) = self.check_url {
            config.upgrade.check_url = check_url;
        }
        if let Some(secs) = self.check_interval {
            config.upgrade.check_interval_secs = secs;
        }
        if let Some(secs) = self.request_timeout {
            config.upgrade.request_timeout_secs = secs;
        }
        if self.no_upgrade {
            config.upgrade.enabled = false;
        }
        if self.log_dir.is_some() {
            config.log_dir = self.log_dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }
}
