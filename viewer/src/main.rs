//! LiveView - headless viewer for live broadcasts with inference overlays

use anyhow::{Context, Result};
use clap::Parser;
use liveview_common::init_tracing;
use liveview_values::SessionCode;
use liveview_viewer::{CliArgs, LiveViewer, ViewerConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = ViewerConfig::load(&args)?;

    init_tracing(config.logging.filter.as_deref(), config.logging.format)
        .context("Failed to initialize logging")?;

    info!("Starting LiveView v{}", env!("CARGO_PKG_VERSION"));

    let code = SessionCode::parse(&args.code)?;
    let viewer = LiveViewer::from_config(config)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match viewer.run(code, shutdown).await {
        Ok(()) => {
            let stats = viewer.deployment_stats();
            info!(
                "Stopped. {} deployments detected ({} in the last minute)",
                stats.total, stats.per_minute
            );
            Ok(())
        }
        Err(e) => {
            error!("Viewer stopped: {}", e);
            Err(e.into())
        }
    }
}
