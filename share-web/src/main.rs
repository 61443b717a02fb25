//! share-web - HTTP server for Sharecast
//!
//! Serves the HTTP surface and runs an embedded worker pool that executes
//! the publish jobs queued by its own requests.

use anyhow::Context;
use clap::Parser;
use libsharecast::jobs::JobQueue;
use libsharecast::logging::{LogFormat, LoggingConfig};
use libsharecast::worker::Worker;
use libsharecast::{Config, SharecastService};
use share_web::{build_router, AppState};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "share-web")]
#[command(version)]
#[command(about = "HTTP server for account connection, composing and share counters")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Do not run publish jobs in this process
    #[arg(long)]
    no_worker: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    LoggingConfig::from_section(&config.logging, cli.log_format, cli.verbose).init();

    let bind = cli.bind.clone().unwrap_or_else(|| config.server.bind.clone());
    let concurrency = config.worker.concurrency.max(1);
    let poll_interval = Duration::from_secs(config.worker.poll_interval_secs.max(1));

    let service = SharecastService::from_config(config).await?;
    let shutdown = Arc::new(AtomicBool::new(false));

    let workers = if cli.no_worker {
        None
    } else {
        let queue: Arc<dyn JobQueue> = service.queue();
        let worker = Worker::new(queue, service.shares().clone());
        Some(tokio::spawn(worker.run(concurrency, poll_interval, shutdown.clone())))
    };

    let app = build_router(AppState::new(service));
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("share-web listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.store(true, Ordering::Relaxed);
    if let Some(workers) = workers {
        if let Err(e) = workers.await {
            error!("Worker pool panicked: {}", e);
        }
    }

    info!("share-web stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: Arc<AtomicBool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, stopping gracefully...");
    shutdown.store(true, Ordering::Relaxed);
}
