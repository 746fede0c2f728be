//! Lockstep - job processing daemon
//!
//! Processes the job names listed in `LOCKSTEP_JOBS` from a shared SQLite
//! store. Any number of daemons may point at the same database file.

mod config;
mod logging;

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use lockstep_core::application::{shutdown_channel, Scheduler};
use lockstep_core::port::id_provider::UuidProvider;
use lockstep_core::port::time_provider::SystemTimeProvider;
use lockstep_infra_calendar::ChronoCalendar;
use lockstep_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};
use lockstep_infra_system::CommandHandler;

use config::DaemonConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration and initialize logging
    let config = DaemonConfig::from_env()?;
    let _log_guard = logging::init(config.log_format, config.log_dir.as_deref())?;

    info!("Lockstep v{} starting...", VERSION);

    if config.jobs.is_empty() {
        bail!("No job names configured; set LOCKSTEP_JOBS, e.g. \"report,cleanup:2\"");
    }

    // 2. Initialize database
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!(db_path = %config.db_path.display(), "Initializing database...");

    let pool = create_pool(&config.database_url())
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 3. Setup dependencies (DI wiring)
    let repo = Arc::new(SqliteJobRepository::new(pool, Arc::new(UuidProvider)));
    let scheduler = Scheduler::new(
        repo,
        Arc::new(ChronoCalendar::new()),
        Arc::new(SystemTimeProvider),
        config.scheduler.clone(),
    );

    let handler = Arc::new(CommandHandler::new(config.env_allowlist.clone()));
    for definition in config.definitions() {
        scheduler
            .define(definition, handler.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Invalid job definition: {}", e))?;
    }

    // 4. Log failures as they happen
    let mut failures = scheduler.subscribe_topic("fail");
    tokio::spawn(async move {
        while let Some(event) = failures.recv().await {
            warn!(
                job_id = ?event.job.id,
                job_name = %event.job.name,
                fail_count = %event.job.fail_count,
                error = ?event.error,
                "Job failed"
            );
        }
    });

    // 5. Start processing loops
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let workers = scheduler.start(shutdown_rx).await;

    info!(workers = %workers.len(), "System ready. Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown: claimed but unstarted jobs are released by each loop
    shutdown_tx.shutdown();
    for worker in workers {
        match tokio::time::timeout(WORKER_JOIN_TIMEOUT, worker).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "Worker stopped with error"),
            Ok(Err(e)) => error!(error = %e, "Worker task failed"),
            Err(_) => warn!("Worker did not stop in time"),
        }
    }

    info!("Shutdown complete.");
    Ok(())
}
