//! # Status Constants
//!
//! Lifecycle states for datasets, jobs, tasks and materialization requests,
//! using the same lowercase wire names the datastore stores.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dataset lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    /// Dataset is accepting materialization and execution
    Processing,
    /// Dataset has stopped growing; existing work keeps running
    Truncated,
    /// Dataset is paused by an operator
    Suspended,
    /// Dataset has failed work that needs attention
    Errors,
    /// All jobs finished
    Complete,
}

impl DatasetStatus {
    /// States whose datasets compete for fair-share priority
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing | Self::Truncated)
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Truncated => write!(f, "truncated"),
            Self::Suspended => write!(f, "suspended"),
            Self::Errors => write!(f, "errors"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for DatasetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "truncated" => Ok(Self::Truncated),
            "suspended" => Ok(Self::Suspended),
            "errors" => Ok(Self::Errors),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid dataset status: {s}")),
        }
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Complete,
    Errors,
    Suspended,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Complete => write!(f, "complete"),
            Self::Errors => write!(f, "errors"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "complete" => Ok(Self::Complete),
            "errors" => Ok(Self::Errors),
            "suspended" => Ok(Self::Suspended),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet admitted
    Idle,
    /// Admitted, eligible for execution
    Waiting,
    /// Handed to a pilot
    Queued,
    /// Running on a pilot
    Processing,
    /// Reset after a failed attempt
    Reset,
    /// Out of retries
    Failed,
    /// Paused by an operator
    Suspended,
    /// Finished successfully
    Complete,
}

impl TaskStatus {
    /// Check if this is a terminal or parked state that no longer competes for resources
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Suspended)
    }

    /// Check if this task satisfies dependencies of other tasks
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Waiting => write!(f, "waiting"),
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Reset => write!(f, "reset"),
            Self::Failed => write!(f, "failed"),
            Self::Suspended => write!(f, "suspended"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "waiting" => Ok(Self::Waiting),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "reset" => Ok(Self::Reset),
            "failed" => Ok(Self::Failed),
            "suspended" => Ok(Self::Suspended),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// Materialization request lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Status groupings used across the scheduler
pub mod status_groups {
    use super::{DatasetStatus, TaskStatus};

    /// Datasets included in priority calculations
    pub const ACTIVE_DATASET_STATUSES: &[DatasetStatus] =
        &[DatasetStatus::Processing, DatasetStatus::Truncated];

    /// Tasks that count toward a dataset's share of outstanding work
    pub const ACTIVE_TASK_STATUSES: &[TaskStatus] = &[
        TaskStatus::Idle,
        TaskStatus::Waiting,
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Reset,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_task_status_wire_names() {
        for status in [
            TaskStatus::Idle,
            TaskStatus::Waiting,
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::Reset,
            TaskStatus::Failed,
            TaskStatus::Suspended,
            TaskStatus::Complete,
        ] {
            assert_eq!(TaskStatus::from_str(&status.to_string()), Ok(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn test_inactive_task_statuses() {
        assert!(TaskStatus::Complete.is_inactive());
        assert!(TaskStatus::Failed.is_inactive());
        assert!(TaskStatus::Suspended.is_inactive());
        assert!(!TaskStatus::Idle.is_inactive());
        assert!(!TaskStatus::Reset.is_inactive());
        assert_eq!(status_groups::ACTIVE_TASK_STATUSES.len(), 5);
    }

    #[test]
    fn test_dataset_status_activity() {
        assert!(DatasetStatus::Processing.is_active());
        assert!(DatasetStatus::Truncated.is_active());
        assert!(!DatasetStatus::Suspended.is_active());
        assert!(DatasetStatus::from_str("bogus").is_err());
    }
}
