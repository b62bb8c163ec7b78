//! # Tasker Batch Runner
//!
//! Standalone process that watches the inbound directory and runs the
//! configured file import job for every new file.
//!
//! ## Usage
//!
//! ```bash
//! # Run with the configuration in ./config
//! cargo run --bin batch-runner
//!
//! # Run with a specific environment overlay
//! TASKER_ENV=production cargo run --bin batch-runner
//! ```

use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use tasker_batch::config::loader::sanitize_database_url;
use tasker_batch::constants::defaults;
use tasker_batch::logging;
use tasker_batch::{BatchBootstrap, ConfigManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging first
    logging::init_structured_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Tasker Batch Runner");

    let manager = ConfigManager::load()?;
    let config = manager.config();
    info!(
        environment = %manager.environment(),
        database_url = %sanitize_database_url(&config.database.url),
        backend = ?config.repository.backend,
        inbound = %config.trigger.inbound_directory.display(),
        "Configuration loaded"
    );

    let mut system = BatchBootstrap::bootstrap_from_manager(&manager).await?;
    system.start();

    if !system.is_running() {
        warn!("Trigger disabled; the runner has nothing to watch");
    }
    info!(jobs = ?system.status().jobs, "Batch runner started, press Ctrl+C to shut down");

    shutdown_signal().await;

    info!("Shutdown signal received, waiting for running executions");
    if system
        .stop(Duration::from_millis(defaults::SHUTDOWN_TIMEOUT_MS))
        .await
    {
        info!("Batch runner shutdown complete");
    } else {
        error!("Shutdown timed out; unfinished executions can be restarted");
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
