use crate::constants::{RequestStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request to materialize one dataset (or every processing dataset)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializationRequest {
    pub request_id: String,
    /// Absent means all processing datasets
    pub dataset_id: Option<String>,
    /// Maximum jobs to buffer; absent means the configured default
    pub num_jobs: Option<u64>,
    /// Initial status for created tasks
    pub set_status: Option<TaskStatus>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl MaterializationRequest {
    pub fn new(
        dataset_id: Option<String>,
        num_jobs: Option<u64>,
        set_status: Option<TaskStatus>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            dataset_id,
            num_jobs,
            set_status,
            status: RequestStatus::Queued,
            created_at: Utc::now(),
        }
    }
}
