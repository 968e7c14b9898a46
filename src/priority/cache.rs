//! Per-run priority statistics.

use crate::constants::status_groups;
use crate::datastore::Datastore;
use crate::error::Result;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Dataset summaries fetched concurrently while loading a generation
const SUMMARY_LOAD_CONCURRENCY: usize = 16;

/// What the priority calculation needs to know about one active dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub dataset_id: String,
    pub username: String,
    pub group: String,
    pub priority: f64,
    pub tasks_per_job: u32,
    pub jobs_submitted: u64,
    pub tasks_submitted: u64,
    /// Tasks not yet complete, failed or suspended
    pub active_tasks: u64,
}

/// Dataset, user and group statistics for one cache generation.
///
/// Loaded on first use; [`PriorityCache::invalidate`] starts a new generation.
#[derive(Debug, Clone, Default)]
pub struct PriorityCache {
    loaded: bool,
    datasets: HashMap<String, DatasetSummary>,
    users: HashMap<String, f64>,
    groups: HashMap<String, f64>,
}

impl PriorityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Drop everything; the next lookup reloads from the datastore
    pub fn invalidate(&mut self) {
        self.loaded = false;
        self.datasets.clear();
        self.users.clear();
        self.groups.clear();
    }

    /// Populate the cache unless this generation is already loaded.
    ///
    /// Failing to list datasets, users or groups propagates. A dataset whose
    /// own summary cannot be read is left out of this generation, so it scores
    /// 0 and does not count toward anyone's share. Nothing is retried here.
    pub async fn ensure_loaded(&mut self, datastore: &dyn Datastore) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        let by_status = datastore.dataset_ids_by_status().await?;
        let dataset_ids: Vec<String> = status_groups::ACTIVE_DATASET_STATUSES
            .iter()
            .filter_map(|status| by_status.get(status))
            .flatten()
            .cloned()
            .collect();

        let results: Vec<(String, Result<DatasetSummary>)> = stream::iter(dataset_ids)
            .map(|dataset_id| async move {
                let result = load_summary(datastore, &dataset_id).await;
                (dataset_id, result)
            })
            .buffer_unordered(SUMMARY_LOAD_CONCURRENCY)
            .collect()
            .await;

        let mut summaries = Vec::with_capacity(results.len());
        for (dataset_id, result) in results {
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!(
                    dataset_id = %dataset_id,
                    error = %e,
                    "Leaving dataset out of priority cache"
                ),
            }
        }

        let users = datastore.list_users().await?;
        let groups = datastore.list_groups().await?;

        self.datasets = summaries
            .into_iter()
            .map(|summary| (summary.dataset_id.clone(), summary))
            .collect();
        self.users = users.into_iter().map(|u| (u.username, u.priority)).collect();
        self.groups = groups.into_iter().map(|g| (g.name, g.priority)).collect();
        self.loaded = true;

        debug!(
            datasets = self.datasets.len(),
            users = self.users.len(),
            groups = self.groups.len(),
            "Priority cache loaded"
        );
        Ok(())
    }

    pub fn dataset(&self, dataset_id: &str) -> Option<&DatasetSummary> {
        self.datasets.get(dataset_id)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &DatasetSummary> {
        self.datasets.values()
    }

    pub fn user_priority(&self, username: &str) -> Option<f64> {
        self.users.get(username).copied()
    }

    pub fn group_priority(&self, group: &str) -> Option<f64> {
        self.groups.get(group).copied()
    }

    pub fn group_priorities(&self) -> impl Iterator<Item = f64> + '_ {
        self.groups.values().copied()
    }

    /// Insert a dataset directly and mark the generation loaded
    pub fn insert_dataset(&mut self, summary: DatasetSummary) {
        self.loaded = true;
        self.datasets.insert(summary.dataset_id.clone(), summary);
    }

    pub fn insert_user(&mut self, username: impl Into<String>, priority: f64) {
        self.users.insert(username.into(), priority);
    }

    pub fn insert_group(&mut self, group: impl Into<String>, priority: f64) {
        self.groups.insert(group.into(), priority);
    }
}

async fn load_summary(datastore: &dyn Datastore, dataset_id: &str) -> Result<DatasetSummary> {
    let dataset = datastore.get_dataset(dataset_id).await?;
    let counts = datastore.task_counts_by_status(dataset_id).await?;
    let active_tasks = status_groups::ACTIVE_TASK_STATUSES
        .iter()
        .filter_map(|status| counts.get(status))
        .sum();

    Ok(DatasetSummary {
        dataset_id: dataset.dataset_id,
        username: dataset.username,
        group: dataset.group,
        priority: dataset.priority,
        tasks_per_job: dataset.tasks_per_job,
        jobs_submitted: dataset.jobs_submitted,
        tasks_submitted: dataset.tasks_submitted,
        active_tasks,
    })
}
