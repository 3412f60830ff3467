//! handover-node CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use handover::logging::{init_logging, version_log_file, LogOptions};
use handover::{build_version, NodeBuilder, NodeExit};
use tracing::{info, info_span, Instrument};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let json = cli.json_logs;
    let config = cli.into_config()?;
    let version = build_version();

    init_logging(&LogOptions {
        level: config.log_level.clone(),
        json,
        file: config
            .log_dir
            .as_deref()
            .map(|dir| version_log_file(dir, &version)),
    })?;

    let span = info_span!("node", version = %version, pid = std::process::id());
    async move {
        info!("handover-node v{version}");

        let node = NodeBuilder::new(config).build().await?;
        match node.run().await? {
            NodeExit::HandedOver => info!("Handed over to the next version"),
            NodeExit::Stopped => info!("Goodbye!"),
        }
        Ok::<(), color_eyre::Report>(())
    }
    .instrument(span)
    .await
}
