use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{error, info};

use webm_ingest::api::{ApiServer, AppState};
use webm_ingest::cli::Args;
use webm_ingest::ingest::IngestDispatcher;
use webm_ingest::{logging, panic_hook};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap reads env fallbacks
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _log_guard = logging::init_logging(args.log_dir.as_deref())?;
    panic_hook::install(args.log_dir.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting webm-ingest"
    );

    let dispatcher = IngestDispatcher::new(args.ingest_config())
        .context("invalid ingest configuration")?;
    dispatcher
        .prepare_output()
        .await
        .context("failed to prepare output directory")?;

    let state = AppState::new(Arc::new(dispatcher));
    let server = ApiServer::new(args.server_config(), state);
    let listener = server.bind().await?;

    let cancel_token = server.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, stopping"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, stopping"),
        }
        cancel_token.cancel();
    });

    server.serve(listener).await?;
    info!("webm-ingest stopped");
    Ok(())
}
