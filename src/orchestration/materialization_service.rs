//! # Materialization Service
//!
//! Long-running consumer of materialization requests. Each leased request
//! runs one [`Materializer::run_once`]; the outcome decides what happens to
//! the request:
//!
//! | Outcome | Queue action |
//! |---|---|
//! | finished | `ack` |
//! | cycle budget exceeded, or a retryable error | `nack_requeue` |
//! | logical failure, or too many deliveries | `fail` |
//!
//! The lease is the cycle timeout plus a margin. An expired lease only makes
//! the request visible again; the run holding it is never cancelled.

use super::materializer::{Materializer, RunOptions};
use crate::config::MaterializationConfig;
use crate::constants::TaskStatus;
use crate::error::{Result, SchedulerError};
use crate::logging::log_request_operation;
use crate::messaging::{DurableQueue, LeasedRequest};
use crate::models::MaterializationRequest;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Result of one [`MaterializationService::process_next`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing to lease
    Idle,
    Completed { request_id: String },
    Requeued { request_id: String, reason: String },
    Failed { request_id: String, reason: String },
}

pub struct MaterializationService {
    materializer: Arc<Materializer>,
    queue: Arc<dyn DurableQueue>,
    config: MaterializationConfig,
}

impl MaterializationService {
    pub fn new(materializer: Arc<Materializer>, queue: Arc<dyn DurableQueue>) -> Self {
        let config = materializer.config().clone();
        Self {
            materializer,
            queue,
            config,
        }
    }

    /// Enqueue a new request for one dataset, or every processing dataset
    pub async fn request_materialization(
        &self,
        dataset_id: Option<String>,
        num_jobs: Option<u64>,
        set_status: Option<TaskStatus>,
    ) -> Result<MaterializationRequest> {
        if dataset_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(SchedulerError::Validation(
                "dataset_id must not be empty".to_string(),
            ));
        }
        if num_jobs == Some(0) {
            return Err(SchedulerError::Validation(
                "num_jobs must be at least 1".to_string(),
            ));
        }

        let request = MaterializationRequest::new(dataset_id, num_jobs, set_status);
        let message_id = self.queue.enqueue(&request).await?;
        log_request_operation(
            "enqueue",
            &request.request_id,
            request.dataset_id.as_deref(),
            "queued",
            None,
            Some(format!("message_id={message_id}").as_str()),
        );
        Ok(request)
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            lease_seconds = self.config.lease_timeout().as_secs(),
            "🚀 Starting materialization service loop"
        );

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let pause = match self.process_next().await {
                Ok(ProcessOutcome::Idle) => true,
                Ok(_) => false,
                Err(e) => {
                    error!(error = %e, "Error processing materialization request");
                    true
                }
            };

            if pause {
                tokio::select! {
                    _ = sleep(self.config.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("🛑 Materialization service loop stopped");
    }

    /// Lease and handle at most one request
    #[instrument(skip(self))]
    pub async fn process_next(&self) -> Result<ProcessOutcome> {
        let Some(leased) = self.queue.lease_next(self.config.lease_timeout()).await? else {
            return Ok(ProcessOutcome::Idle);
        };
        let request_id = leased.request.request_id.clone();

        if leased.delivery_count > self.config.max_delivery_attempts {
            let reason = format!(
                "gave up after {} deliveries",
                self.config.max_delivery_attempts
            );
            self.queue.fail(&leased, &reason).await?;
            self.log_outcome(&leased, "error", &reason);
            return Ok(ProcessOutcome::Failed { request_id, reason });
        }

        match self.handle(&leased).await {
            Ok(()) => {
                self.queue.ack(&leased).await?;
                self.log_outcome(&leased, "complete", "");
                Ok(ProcessOutcome::Completed { request_id })
            }
            Err(e) if e.is_retryable() => {
                let reason = e.to_string();
                warn!(request_id = %request_id, error = %reason, "Requeueing materialization request");
                self.queue.nack_requeue(&leased).await?;
                self.log_outcome(&leased, "queued", &reason);
                Ok(ProcessOutcome::Requeued { request_id, reason })
            }
            Err(e) => {
                let reason = e.to_string();
                error!(request_id = %request_id, error = %reason, "❌ Materialization request failed");
                self.queue.fail(&leased, &reason).await?;
                self.log_outcome(&leased, "error", &reason);
                Ok(ProcessOutcome::Failed { request_id, reason })
            }
        }
    }

    async fn handle(&self, leased: &LeasedRequest) -> Result<()> {
        let request = &leased.request;
        let mut options = RunOptions::new(request.num_jobs.unwrap_or(self.config.default_num_jobs))
            .with_status(request.set_status);
        if let Some(dataset_id) = &request.dataset_id {
            options = options.for_dataset(dataset_id.clone());
        }

        if self.materializer.run_once(&options).await? {
            Ok(())
        } else {
            Err(SchedulerError::MaterializationTimeout {
                request_id: request.request_id.clone(),
            })
        }
    }

    fn log_outcome(&self, leased: &LeasedRequest, status: &str, details: &str) {
        log_request_operation(
            "materialize",
            &leased.request.request_id,
            leased.request.dataset_id.as_deref(),
            status,
            Some(leased.delivery_count),
            (!details.is_empty()).then_some(details),
        );
    }
}
