//! # Queue Admission Cycle
//!
//! Promotes the highest-priority idle tasks to `waiting`, bounded both by the
//! room left under `max_total_ready` and by `max_per_cycle`. Candidates are
//! over-fetched so tasks blocked on dependencies do not leave the cycle short.
//!
//! Dependency checks run concurrently up to a fixed limit. Once enough tasks
//! are admittable no new checks are started, but checks already in flight are
//! drained. A task whose dependencies are not all complete gets priority 0 so
//! it sinks behind ready work until a later cycle re-scores it.

use crate::config::QueueAdmissionConfig;
use crate::constants::TaskStatus;
use crate::datastore::{Datastore, DatastoreError, DatastoreResult};
use crate::error::Result;
use crate::models::Task;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What one admission cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionReport {
    pub to_admit: u64,
    pub candidates: usize,
    pub admitted: usize,
    /// Tasks excluded because a dependency is not complete
    pub dependency_blocked: usize,
    /// Tasks excluded because their dependency check failed to run
    pub check_errors: usize,
}

pub struct QueueAdmission {
    datastore: Arc<dyn Datastore>,
    config: QueueAdmissionConfig,
}

enum CheckResult {
    Ready,
    Blocked,
    Error(DatastoreError),
}

impl QueueAdmission {
    pub fn new(datastore: Arc<dyn Datastore>, config: QueueAdmissionConfig) -> Self {
        Self { datastore, config }
    }

    /// Run with the configured limits
    pub async fn run_configured(&self) -> Result<AdmissionReport> {
        self.run(self.config.max_total_ready, self.config.max_per_cycle)
            .await
    }

    #[instrument(skip(self))]
    pub async fn run(&self, max_total_ready: u64, max_per_cycle: u64) -> Result<AdmissionReport> {
        let datastore = self.datastore.as_ref();
        let counts = datastore.global_task_counts().await?;
        let idle = counts.get(&TaskStatus::Idle).copied().unwrap_or(0);
        let waiting = counts.get(&TaskStatus::Waiting).copied().unwrap_or(0);

        let to_admit = idle
            .min(max_total_ready.saturating_sub(waiting))
            .min(max_per_cycle);
        let mut report = AdmissionReport {
            to_admit,
            ..AdmissionReport::default()
        };

        if to_admit == 0 {
            debug!(idle = idle, waiting = waiting, "Nothing to admit this cycle");
            return Ok(report);
        }
        let target = usize::try_from(to_admit).unwrap_or(usize::MAX);

        let candidates = datastore
            .idle_tasks_by_priority(target.saturating_mul(self.config.overfetch_factor.max(1)))
            .await?;
        report.candidates = candidates.len();

        // (priority rank, task id)
        let mut admittable: Vec<(usize, String)> = Vec::new();
        let mut in_flight: FuturesUnordered<BoxFuture<'_, (usize, Task, CheckResult)>> =
            FuturesUnordered::new();
        let limit = self.config.max_concurrent_dependency_checks.max(1);

        for (rank, task) in candidates.into_iter().enumerate() {
            if admittable.len() >= target {
                break;
            }
            if task.depends.is_empty() {
                admittable.push((rank, task.task_id));
                continue;
            }

            while in_flight.len() >= limit {
                if let Some((rank, task, result)) = in_flight.next().await {
                    self.record_check(rank, task, result, &mut admittable, &mut report)
                        .await;
                }
            }
            if admittable.len() >= target {
                break;
            }

            in_flight.push(
                async move {
                    let result = check_dependencies(datastore, &task).await;
                    (rank, task, result)
                }
                .boxed(),
            );
        }

        while let Some((rank, task, result)) = in_flight.next().await {
            self.record_check(rank, task, result, &mut admittable, &mut report)
                .await;
        }

        admittable.sort_by_key(|(rank, _)| *rank);
        admittable.truncate(target);
        let task_ids: Vec<String> = admittable.into_iter().map(|(_, id)| id).collect();

        for batch in task_ids.chunks(self.config.bulk_batch_size.max(1)) {
            datastore
                .bulk_set_task_status(batch, TaskStatus::Waiting)
                .await?;
        }
        report.admitted = task_ids.len();

        info!(
            idle = idle,
            waiting = waiting,
            to_admit = to_admit,
            candidates = report.candidates,
            admitted = report.admitted,
            dependency_blocked = report.dependency_blocked,
            check_errors = report.check_errors,
            "✅ Queue admission cycle complete"
        );
        Ok(report)
    }

    async fn record_check(
        &self,
        rank: usize,
        task: Task,
        result: CheckResult,
        admittable: &mut Vec<(usize, String)>,
        report: &mut AdmissionReport,
    ) {
        match result {
            CheckResult::Ready => admittable.push((rank, task.task_id)),
            CheckResult::Blocked => {
                report.dependency_blocked += 1;
                if let Err(e) = self.datastore.update_task_priority(&task.task_id, 0.0).await {
                    warn!(task_id = %task.task_id, error = %e, "Failed to reset priority of blocked task");
                }
            }
            CheckResult::Error(e) => {
                report.check_errors += 1;
                warn!(task_id = %task.task_id, error = %e, "Dependency check failed, skipping task this cycle");
            }
        }
    }
}

async fn check_dependencies(datastore: &dyn Datastore, task: &Task) -> CheckResult {
    match dependencies_complete(datastore, &task.depends).await {
        Ok(true) => CheckResult::Ready,
        Ok(false) => CheckResult::Blocked,
        Err(e) => CheckResult::Error(e),
    }
}

async fn dependencies_complete(datastore: &dyn Datastore, depends: &[String]) -> DatastoreResult<bool> {
    for dependency in depends {
        match datastore.get_task(dependency).await {
            Ok(task) if task.status.satisfies_dependencies() => continue,
            Ok(_) | Err(DatastoreError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
