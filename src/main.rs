//! TaxHub Server — background job processing and rate limiting for the
//! tax-filing assistant backend.
//!
//! Entry point that wires the crates together: store, event fan-out,
//! job handlers, dispatch loop, and the adaptive rate limit controller.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use taxhub_core::config::AppConfig;
use taxhub_core::error::AppError;
use taxhub_core::traits::EventSink;
use taxhub_limiter::{AdaptiveController, LimiterRegistry};
use taxhub_notify::BroadcastEventSink;
use taxhub_queue::jobs::{DataValidationHandler, RetentionCleanupHandler};
use taxhub_queue::{JobExecutor, JobService, WorkerRunner};
use taxhub_store::{JobStore, MemoryJobStore};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("TAXHUB_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt().pretty().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting TaxHub v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Store and event fan-out ──────────────────────────
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let sink = Arc::new(BroadcastEventSink::default());

    // ── Step 2: Register job handlers ────────────────────────────
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(RetentionCleanupHandler::new(
        Arc::clone(&store),
        config.queue.completed_retention_days,
    )));
    executor.register(Arc::new(DataValidationHandler::new()));
    let executor = Arc::new(executor);
    tracing::info!(
        handlers = executor.registered_types().len(),
        "Job handlers registered"
    );

    // ── Step 3: Job service + queue recovery ─────────────────────
    let service = JobService::new(
        Arc::clone(&store),
        sink.clone() as Arc<dyn EventSink>,
        Arc::clone(&executor),
        config.queue.clone(),
        &config.retry,
    );
    let recovered = service.recover().await?;
    if recovered > 0 {
        tracing::info!(recovered, "Re-admitted persisted jobs");
    }

    // ── Step 4: Shutdown channel ─────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Step 5: Start worker dispatch loop ───────────────────────
    let worker_handle = if config.queue.enabled {
        let runner = WorkerRunner::new(Arc::clone(&service));
        let worker_cancel = shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            runner.run(worker_cancel).await;
        });
        tracing::info!("Background worker started");
        Some(handle)
    } else {
        tracing::info!("Background worker disabled");
        None
    };

    // ── Step 6: Rate limiter + adaptive controller ───────────────
    let limiters = Arc::new(LimiterRegistry::from_config(&config.rate_limit));
    let adaptive_handle = if config.rate_limit.adaptive.enabled {
        let controller =
            AdaptiveController::new(Arc::clone(&limiters), config.rate_limit.adaptive);
        let adaptive_cancel = shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            controller.run(adaptive_cancel).await;
        });
        tracing::info!("Adaptive rate limit controller started");
        Some(handle)
    } else {
        tracing::info!("Adaptive rate limit scaling disabled");
        None
    };

    tracing::info!("TaxHub server running");

    // ── Step 7: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
    let _ = shutdown_tx.send(true);

    let grace = std::time::Duration::from_secs(config.queue.shutdown_grace_seconds + 5);
    if let Some(handle) = worker_handle {
        let _ = tokio::time::timeout(grace, handle).await;
    }
    if let Some(handle) = adaptive_handle {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
    }

    let stats = service.queue_stats().await?;
    tracing::info!(
        queue_depth = stats.queue_depth,
        in_flight = stats.in_flight,
        "TaxHub server shut down gracefully"
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
