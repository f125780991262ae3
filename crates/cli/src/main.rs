//! ChangeSync CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `changesync.toml` (or `--config`) merged
//!    with `CHANGESYNC_*` environment overrides, and validate it.
//! 2. **Wire observability**: install a `tracing-subscriber` registry with a
//!    JSON or pretty log layer and, when configured, an OpenTelemetry OTLP
//!    exporter. Every span and event from the workspace flows through it.
//! 3. **Construct infrastructure**: build the concrete queue (`RedisQueue` or
//!    `MemoryQueue`), the `GitHubClient` changed-files lookup, and the
//!    `LoggingSink`, and inject them into the `IngestionEndpoint` and the
//!    `ConsolidationWorker`.
//! 4. **Select process role**:
//!    - `serve`: run the webhook receiver only.
//!    - `worker`: run the consolidation worker only.
//!    - `run`: run both in one process (the only role that accepts the
//!      in-memory queue).
//!
//! SIGINT and SIGTERM trigger a graceful stop: the receiver drains in-flight
//! requests and the worker flushes any pending batch.

mod settings;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use github::GitHubClient;
use listener::{RedisQueue, WebhookState};
use pipeline::EventQueue;
use stages::{ConsolidationWorker, IngestionEndpoint, LoggingSink, MemoryQueue, WorkerConfig};
use tokio::sync::watch;
use tracing::{error, info};

use crate::settings::{QueueBackend, Settings};

#[derive(Debug, Parser)]
#[command(name = "changesync", version, about = "Merged pull request change consolidation")]
struct Cli {
    /// Configuration file. Defaults to `changesync.toml` in the working
    /// directory when present.
    #[arg(short, long, env = "CHANGESYNC_CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Run the webhook receiver.
    Serve,
    /// Run the consolidation worker.
    Worker,
    /// Run the receiver and the worker in one process.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let _telemetry = telemetry::init(&settings.telemetry)?;

    if settings.queue.backend == QueueBackend::Memory && cli.command != Command::Run {
        bail!("queue.backend = \"memory\" is only supported by the `run` command");
    }

    let queue = build_queue(&settings).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    match cli.command {
        Command::Serve => run_receiver(&settings, queue, shutdown_rx).await?,
        Command::Worker => run_worker(settings.worker_config(), queue, shutdown_rx).await,
        Command::Run => run_all(&settings, queue, &shutdown_tx).await?,
    }

    info!("Shutdown complete");
    Ok(())
}

async fn build_queue(settings: &Settings) -> anyhow::Result<Arc<dyn EventQueue>> {
    match settings.queue.backend {
        QueueBackend::Redis => {
            let redis = RedisQueue::connect(settings.redis_config())
                .await
                .with_context(|| {
                    format!(
                        "failed to connect to Redis at {}:{}",
                        settings.queue.host, settings.queue.port
                    )
                })?;
            Ok(Arc::new(redis))
        }
        QueueBackend::Memory => Ok(Arc::new(MemoryQueue::new())),
    }
}

/// Runs the worker in the background and the receiver in the foreground.
///
/// Whichever way the receiver ends, the worker is told to stop and awaited
/// before returning, so a failed bind surfaces as an error instead of leaving
/// the worker running.
async fn run_all(
    settings: &Settings,
    queue: Arc<dyn EventQueue>,
    shutdown: &watch::Sender<bool>,
) -> anyhow::Result<()> {
    let worker = tokio::spawn(run_worker(
        settings.worker_config(),
        queue.clone(),
        shutdown.subscribe(),
    ));
    let served = run_receiver(settings, queue, shutdown.subscribe()).await;
    let _ = shutdown.send(true);
    worker.await.context("consolidation worker panicked")?;
    served
}

async fn run_receiver(
    settings: &Settings,
    queue: Arc<dyn EventQueue>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if settings.github.token.is_none() {
        info!("No GitHub token configured; changed-files lookups are unauthenticated");
    }
    let files = GitHubClient::new(settings.github_config())
        .context("failed to build GitHub client")?;
    let endpoint = IngestionEndpoint::new(queue, Arc::new(files), settings.ingestion_config());
    let router = listener::webhook_router(WebhookState::new(Arc::new(endpoint)));

    listener::serve(settings.server.bind, router, wait_for_shutdown(shutdown))
        .await
        .with_context(|| format!("webhook receiver failed on {}", settings.server.bind))
}

async fn run_worker(
    config: WorkerConfig,
    queue: Arc<dyn EventQueue>,
    shutdown: watch::Receiver<bool>,
) {
    ConsolidationWorker::new(queue, Arc::new(LoggingSink), config)
        .run(shutdown)
        .await;
}

/// Resolves once `shutdown` carries `true` or its sender is dropped.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
