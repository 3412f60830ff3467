//! handover-catalog CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use handover::logging::{init_logging, LogOptions};
use handover::{CatalogServer, Signer};
use tracing::{info, info_span, Instrument};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let json = cli.json_logs;
    let config = cli.into_config()?;

    init_logging(&LogOptions {
        level: config.log_level.clone(),
        json,
        file: None,
    })?;

    let version = env!("CARGO_PKG_VERSION");
    let span = info_span!("catalog", version, pid = std::process::id());
    async move {
        info!("handover-catalog v{version}");

        let signer = Signer::embedded()?;
        let server = CatalogServer::new(config, signer)?;
        server.run().await?;

        info!("Goodbye!");
        Ok::<(), color_eyre::Report>(())
    }
    .instrument(span)
    .await
}
