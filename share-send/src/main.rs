//! share-send - Background worker for share publishing
//!
//! Executes queued publish jobs and periodically sweeps for pending shares
//! of entries that went live on schedule.

use chrono::Utc;
use clap::Parser;
use libsharecast::jobs::JobQueue;
use libsharecast::logging::{LogFormat, LoggingConfig};
use libsharecast::worker::Worker;
use libsharecast::{Config, Result, SharecastError, SharecastService};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "share-send")]
#[command(version)]
#[command(about = "Background worker for share publishing")]
#[command(long_about = "\
share-send - Background worker for share publishing

DESCRIPTION:
    share-send is a long-running daemon that executes the publish jobs
    queued when entries go live. Each job publishes one share at most once,
    even when the same share was queued twice.

    Every sweep interval it also queues pending shares of entries that went
    live on schedule, without a save request.

USAGE:
    # Run in foreground (logs to stderr)
    share-send

    # Four parallel workers, poll every 10 seconds
    share-send --concurrency 4 --poll-interval 10

    # Sweep, run every queued job and exit
    share-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes running jobs)

CONFIGURATION:
    Configuration file: ~/.config/sharecast/config.toml

    [worker]
    concurrency = 2            # parallel jobs
    poll_interval_secs = 5     # idle wait between queue polls
    sweep_interval_secs = 300  # pending-entries sweep, 0 disables
    lease_secs = 300           # stale job / share claim timeout
    max_attempts = 3           # deliveries before a job is failed

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Parallel jobs (overrides config)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Sweep once, run every queued job and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    LoggingConfig::from_section(&config.logging, cli.log_format, cli.verbose).init();

    let poll_interval = cli.poll_interval.unwrap_or(config.worker.poll_interval_secs).max(1);
    let concurrency = cli.concurrency.unwrap_or(config.worker.concurrency);
    if concurrency == 0 {
        return Err(SharecastError::InvalidInput(
            "Concurrency must be at least 1".to_string(),
        ));
    }
    let sweep_interval = config.worker.sweep_interval_secs;

    let service = SharecastService::from_config(config).await?;
    let queue: Arc<dyn JobQueue> = service.queue();
    let worker = Worker::new(queue, service.shares().clone());

    info!("share-send worker starting");

    if cli.once {
        sweep(&service).await?;
        let processed = worker.drain().await?;
        let stats = service.queue().stats().await?;
        info!(processed, failed = stats.failed, "Processed queued jobs once, exiting");
        println!("Processed {} job(s)", processed);
        return Ok(());
    }

    // Set up graceful shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let sweeper = (sweep_interval > 0).then(|| {
        tokio::spawn(run_sweep_loop(service.clone(), sweep_interval, shutdown.clone()))
    });

    worker
        .run(concurrency, Duration::from_secs(poll_interval), shutdown)
        .await;

    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            error!("Sweep task panicked: {}", e);
        }
    }

    info!("share-send worker stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| SharecastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    // Spawn thread to handle signals
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

/// Queue pending shares of live entries every `interval` seconds
async fn run_sweep_loop(service: SharecastService, interval: u64, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        if let Err(e) = sweep(&service).await {
            error!("Error sweeping pending entries: {}", e);
        }

        // Sleep until next sweep (check shutdown every second)
        for _ in 0..interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

async fn sweep(service: &SharecastService) -> Result<()> {
    let queued = service
        .shares()
        .publish_shares_from_pending_entries(Utc::now(), false)
        .await?;
    if !queued.is_empty() {
        info!("Queued {} pending share(s)", queued.len());
    }
    Ok(())
}
