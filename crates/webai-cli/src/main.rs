//! CLI entry point - the composition root.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use webai_cli::{Cli, bind_listener, init_logging, report_backend_health};
use webai_proxy::{PROBE_TIMEOUT, TracingTrafficLog, probe_backend, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so it feeds the env-backed flags
    dotenvy::dotenv().ok();

    init_logging();

    let cli = Cli::parse();
    let config = Arc::new(cli.into_config().context("Invalid configuration")?);
    info!(?config, "Starting webai-proxy");

    let health = probe_backend(&config, PROBE_TIMEOUT).await;
    report_backend_health(&config, &health);

    let listener = bind_listener(&config).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    serve(listener, config, Arc::new(TracingTrafficLog::new()), cancel).await
}
