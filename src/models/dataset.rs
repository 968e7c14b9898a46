use crate::constants::DatasetStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Dataset represents one submitted production: a target number of jobs,
/// each expanded into the same fixed set of tasks.
/// Maps to `GET /datasets/{dataset_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_id: String,
    /// Human-facing dataset number
    pub dataset: u64,
    pub username: String,
    pub group: String,
    pub status: DatasetStatus,
    pub tasks_per_job: u32,
    pub jobs_submitted: u64,
    pub tasks_submitted: u64,
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub debug: bool,
}

impl Dataset {
    /// Whether `tasks_submitted` agrees with `jobs_submitted * tasks_per_job`
    pub fn is_consistent(&self) -> bool {
        self.tasks_submitted == self.jobs_submitted * u64::from(self.tasks_per_job)
    }
}

/// A dependency entry exactly as written in a task template.
///
/// Templates allow either a bare integer (a task index) or a string
/// (a task name, a numeric string, `dataset_id:name_or_index`, or a raw task id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawDependency {
    Index(i64),
    Name(String),
}

impl fmt::Display for RawDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(s) => write!(f, "{s}"),
        }
    }
}

/// One task definition inside a dataset's task-template config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub name: String,
    #[serde(default)]
    pub depends: Vec<RawDependency>,
    /// Requirement expressions, evaluated against the dataset config at buffer time
    #[serde(default)]
    pub requirements: Map<String, Value>,
}

/// Dataset task-template config.
/// Maps to `GET /config/{dataset_id}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub tasks: Vec<TaskTemplate>,
    /// Steering parameters referenced by requirement expressions
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl DatasetConfig {
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }
}
