use crate::constants::TaskStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Normalized resource requirements (`cpu`, `gpu`, `memory`, `disk`, ...)
pub type Requirements = BTreeMap<String, Value>;

/// Task represents one unit of work inside a job.
/// Maps to `GET /datasets/{dataset_id}/tasks`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub dataset_id: String,
    pub job_id: String,
    pub job_index: u64,
    pub task_index: u32,
    pub name: String,
    /// Resolved dependency task ids
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub requirements: Requirements,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: f64,
}

/// Dataset-derived values stamped onto every task before it is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub job: u64,
    pub task: u32,
    pub dataset: u64,
    pub jobs_submitted: u64,
    pub tasks_submitted: u64,
    pub debug: bool,
}

/// New Task for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub dataset_id: String,
    pub job_id: String,
    pub job_index: u64,
    pub task_index: u32,
    pub name: String,
    pub depends: Vec<String>,
    pub requirements: Requirements,
    pub status: TaskStatus,
    pub options: TaskOptions,
}
