use crate::constants::JobStatus;
use serde::{Deserialize, Serialize};

/// Job represents one instance of a dataset's task set.
/// Maps to `GET /datasets/{dataset_id}/jobs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub dataset_id: String,
    pub job_index: u64,
    pub status: JobStatus,
}

/// New Job for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub dataset_id: String,
    pub job_index: u64,
    pub status: JobStatus,
}
