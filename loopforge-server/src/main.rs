//! loopforge-server - LoopForge backend binary
//!
//! Wires the singletons (database, storage, event bus, job queue), registers
//! the job processors, and serves the HTTP/WS API. Background workers are
//! drained on shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use loopforge_common::config::ForgeConfig;
use loopforge_common::{db, EventBus, Storage};
use loopforge_server::queue::JobQueue;
use loopforge_server::{build_router, workers, AppState};

#[derive(Debug, Parser)]
#[command(name = "loopforge-server", about = "LoopForge backend service")]
struct Cli {
    /// Directory holding the database (env: LOOPFORGE_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Root of the file storage tree (env: LOOPFORGE_STORAGE)
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Number of background job workers
    #[arg(long)]
    workers: Option<usize>,

    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1:8450")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = ForgeConfig::from_env(cli.data_dir, cli.storage_dir, cli.workers);

    tracing::info!("Starting loopforge-server");
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Version");
    tracing::info!(data_dir = %config.data_dir.display(), storage = %config.storage_dir.display(), "Paths");
    if config.quick_mode {
        tracing::info!("Quick mode enabled: separation copies the source as stems");
    }

    let pool = db::init_database(&config.db_path()).await?;
    let storage = Storage::new(&config.storage_dir)?;
    let event_bus = EventBus::new(1000);

    let queue = Arc::new(JobQueue::new(
        pool.clone(),
        event_bus.clone(),
        storage.clone(),
        config.clone(),
    ));
    workers::register_all(&queue);
    queue.start().await?;

    let state = AppState::new(pool, storage, event_bus, Arc::clone(&queue), config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    tracing::info!(bind = %cli.bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
