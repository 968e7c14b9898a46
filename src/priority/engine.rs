//! Fair-share priority calculation.
//!
//! Dataset priority starts at 1.0 and is scaled by the dataset's weight
//! relative to its user's and group's other datasets, by the user's weight
//! within the group and by the group's weight globally. A size penalty then
//! pushes down datasets holding a large share of the active tasks.
//!
//! Task priority adds three bonuses on top: later tasks in a job, earlier
//! jobs in a dataset, and a strong boost for the first jobs of any dataset.
//! Every result is clamped to `[0, 1]`.

use super::cache::{DatasetSummary, PriorityCache};
use crate::config::PriorityConfig;
use crate::datastore::Datastore;
use crate::error::Result;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct PriorityEngine {
    config: PriorityConfig,
}

impl PriorityEngine {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PriorityConfig {
        &self.config
    }

    /// Priority of a dataset, loading the cache generation if needed.
    /// Unknown datasets score 0.
    pub async fn dataset_priority(
        &self,
        datastore: &dyn Datastore,
        cache: &mut PriorityCache,
        dataset_id: &str,
    ) -> Result<f64> {
        cache.ensure_loaded(datastore).await?;
        Ok(self.compute_dataset_priority(cache, dataset_id))
    }

    /// Priority of an existing task, looked up by id
    pub async fn task_priority(
        &self,
        datastore: &dyn Datastore,
        cache: &mut PriorityCache,
        dataset_id: &str,
        task_id: &str,
    ) -> Result<f64> {
        cache.ensure_loaded(datastore).await?;
        let task = datastore.get_task(task_id).await?;
        Ok(self.compute_task_priority(cache, dataset_id, task.job_index, task.task_index))
    }

    /// Priority of the task at `(job_index, task_index)`, for tasks that are
    /// being created and have no id yet
    pub async fn task_priority_at(
        &self,
        datastore: &dyn Datastore,
        cache: &mut PriorityCache,
        dataset_id: &str,
        job_index: u64,
        task_index: u32,
    ) -> Result<f64> {
        cache.ensure_loaded(datastore).await?;
        Ok(self.compute_task_priority(cache, dataset_id, job_index, task_index))
    }

    pub fn compute_dataset_priority(&self, cache: &PriorityCache, dataset_id: &str) -> f64 {
        let Some(dataset) = cache.dataset(dataset_id) else {
            debug!(dataset_id = %dataset_id, "Dataset not in priority cache, scoring 0");
            return 0.0;
        };

        let mut priority = 1.0;

        let max_for_user = max_of(
            cache
                .datasets()
                .filter(|d| d.username == dataset.username)
                .map(|d| d.priority),
        );
        priority *= ratio(dataset.priority, max_for_user);

        let max_for_group = max_of(
            cache
                .datasets()
                .filter(|d| d.group == dataset.group)
                .map(|d| d.priority),
        );
        priority *= ratio(dataset.priority, max_for_group);

        if let Some(user_priority) = cache.user_priority(&dataset.username) {
            let max_user_in_group = max_of(
                cache
                    .datasets()
                    .filter(|d| d.group == dataset.group)
                    .filter_map(|d| cache.user_priority(&d.username)),
            );
            priority *= ratio(user_priority, max_user_in_group);
        }

        if let Some(group_priority) = cache.group_priority(&dataset.group) {
            priority *= ratio(group_priority, max_of(cache.group_priorities()));
        }

        priority -= self.size_penalty(cache, dataset);

        clamp_unit(priority)
    }

    pub fn compute_task_priority(
        &self,
        cache: &PriorityCache,
        dataset_id: &str,
        job_index: u64,
        task_index: u32,
    ) -> f64 {
        let Some(dataset) = cache.dataset(dataset_id) else {
            return 0.0;
        };
        if dataset.tasks_submitted < 1 {
            return 0.0;
        }

        let mut priority = self.compute_dataset_priority(cache, dataset_id);

        if dataset.tasks_per_job > 0 {
            priority += (f64::from(task_index) / f64::from(dataset.tasks_per_job))
                / self.config.finishing_bonus_divisor;
        }

        if dataset.jobs_submitted > 0 {
            let jobs = dataset.jobs_submitted as f64;
            priority += ((jobs - job_index as f64) / jobs) / self.config.early_job_divisor;
        }

        let ramp = self.config.ramp_job_threshold;
        if job_index < ramp {
            priority += (ramp - job_index) as f64 / ramp as f64;
        }

        clamp_unit(priority)
    }

    fn size_penalty(&self, cache: &PriorityCache, dataset: &DatasetSummary) -> f64 {
        let total: u64 = cache.datasets().map(|d| d.active_tasks).sum();
        if total == 0 {
            return 0.0;
        }
        (dataset.active_tasks as f64 / total as f64) / self.config.size_penalty_divisor
    }
}

fn max_of(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(0.0, f64::max)
}

/// `numerator / denominator`, or 1 when there is nothing to compare against
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        1.0
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
