//! # IceProd Scheduler Process
//!
//! Runs the materialization service loop and the periodic queue admission
//! cycle until interrupted. Configuration comes from `config/` plus
//! `ICEPROD__*` environment variables; there are no command-line arguments.

use anyhow::Context;
use iceprod_scheduler::config::ConfigManager;
use iceprod_scheduler::datastore::RestDatastore;
use iceprod_scheduler::logging::init_structured_logging;
use iceprod_scheduler::messaging::PgmqQueue;
use iceprod_scheduler::orchestration::{MaterializationService, Materializer, QueueAdmission};
use iceprod_scheduler::priority::PriorityEngine;
use iceprod_scheduler::resilience::{RetryPolicy, RetryingDatastore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let manager = ConfigManager::load().context("Failed to load scheduler configuration")?;
    let config = manager.config().clone();
    info!(environment = %manager.environment(), "🚀 Starting IceProd scheduler");

    let rest = RestDatastore::new(config.datastore.clone()).context("Invalid datastore settings")?;
    let datastore = Arc::new(RetryingDatastore::new(
        rest,
        RetryPolicy::from_config(&config.retry),
    ));

    let queue = Arc::new(
        PgmqQueue::connect(&config.pgmq)
            .await
            .context("Failed to connect to the materialization request queue")?,
    );

    let materializer = Arc::new(Materializer::new(
        datastore.clone(),
        PriorityEngine::new(config.priority.clone()),
        config.materialization.clone(),
    ));
    let service = MaterializationService::new(materializer, queue);
    let admission = QueueAdmission::new(datastore, config.queue_admission.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let service_handle = tokio::spawn(async move { service.run(shutdown_rx).await });

    let mut admission_shutdown = shutdown_tx.subscribe();
    let admission_interval = Duration::from_secs(config.queue_admission.interval_seconds);
    let admission_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(admission_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = admission.run_configured().await {
                        error!(error = %e, "Queue admission cycle failed");
                    }
                }
                _ = admission_shutdown.changed() => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("🛑 Shutdown requested, waiting for in-flight work");
    let _ = shutdown_tx.send(true);

    if let Err(e) = service_handle.await {
        error!(error = %e, "Materialization service task panicked");
    }
    if let Err(e) = admission_handle.await {
        error!(error = %e, "Queue admission task panicked");
    }

    info!("✅ IceProd scheduler stopped");
    Ok(())
}
