//! # Datastore Interface
//!
//! The scheduler talks to the remote dataset/job/task store only through the
//! [`Datastore`] trait. The production implementation is [`rest::RestDatastore`];
//! [`memory::InMemoryDatastore`] backs tests and offline dry runs.
//!
//! Retries are not the business of implementations: wrap any store in
//! [`crate::resilience::RetryingDatastore`] to apply the retry policy.

pub mod memory;
pub mod rest;

use crate::constants::{DatasetStatus, JobStatus, TaskStatus};
use crate::models::{Dataset, DatasetConfig, Group, Job, NewJob, NewTask, Task, User};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub use memory::InMemoryDatastore;
pub use rest::{RestDatastore, RestDatastoreConfig};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatastoreError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Response decode error: {0}")]
    Decode(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DatastoreError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Transient errors are worth retrying; everything else is a definitive answer
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

pub type DatastoreResult<T> = std::result::Result<T, DatastoreError>;

/// Filter for task listings within one dataset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub job_id: Option<String>,
    pub job_index: Option<u64>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn for_job_id(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::default()
        }
    }

    pub fn for_job_index(job_index: u64) -> Self {
        Self {
            job_index: Some(job_index),
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.job_id.as_ref().map_or(true, |id| *id == task.job_id)
            && self.job_index.map_or(true, |idx| idx == task.job_index)
            && self.status.map_or(true, |s| s == task.status)
    }
}

/// Remote store of datasets, jobs and tasks
#[async_trait]
pub trait Datastore: Send + Sync {
    /// `GET /dataset_summaries/status`
    async fn dataset_ids_by_status(&self) -> DatastoreResult<HashMap<DatasetStatus, Vec<String>>>;

    /// `GET /datasets/{id}`
    async fn get_dataset(&self, dataset_id: &str) -> DatastoreResult<Dataset>;

    /// `GET /config/{dataset_id}`
    async fn get_dataset_config(&self, dataset_id: &str) -> DatastoreResult<DatasetConfig>;

    /// `GET /datasets/{id}/jobs`
    async fn list_jobs(&self, dataset_id: &str) -> DatastoreResult<Vec<Job>>;

    /// `POST /jobs`, returning the new job id
    async fn create_job(&self, job: &NewJob) -> DatastoreResult<String>;

    /// `GET /datasets/{id}/job_counts/status`
    async fn job_counts_by_status(&self, dataset_id: &str)
        -> DatastoreResult<HashMap<JobStatus, u64>>;

    /// `GET /datasets/{id}/task_counts/status`
    async fn task_counts_by_status(
        &self,
        dataset_id: &str,
    ) -> DatastoreResult<HashMap<TaskStatus, u64>>;

    /// `GET /datasets/{id}/tasks`
    async fn list_tasks(&self, dataset_id: &str, filter: &TaskFilter)
        -> DatastoreResult<Vec<Task>>;

    /// `GET /tasks/{id}`
    async fn get_task(&self, task_id: &str) -> DatastoreResult<Task>;

    /// `POST /tasks`, returning the new task id
    async fn create_task(&self, task: &NewTask) -> DatastoreResult<String>;

    /// `PATCH /tasks/{id}` with a new priority
    async fn update_task_priority(&self, task_id: &str, priority: f64) -> DatastoreResult<()>;

    /// `GET /task_counts/status` across all datasets
    async fn global_task_counts(&self) -> DatastoreResult<HashMap<TaskStatus, u64>>;

    /// `GET /tasks?status=idle`, highest priority first
    async fn idle_tasks_by_priority(&self, limit: usize) -> DatastoreResult<Vec<Task>>;

    /// `POST /task_actions/bulk_status/{status}`
    async fn bulk_set_task_status(
        &self,
        task_ids: &[String],
        status: TaskStatus,
    ) -> DatastoreResult<()>;

    /// `GET /users`
    async fn list_users(&self) -> DatastoreResult<Vec<User>>;

    /// `GET /groups`
    async fn list_groups(&self) -> DatastoreResult<Vec<Group>>;
}
