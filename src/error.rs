use crate::datastore::DatastoreError;
use crate::messaging::MessagingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Dependency resolution error for task {task_name}: dependency {dependency}: {reason}")]
    DependencyResolution {
        task_name: String,
        dependency: String,
        reason: String,
    },
    #[error("Invalid requirement {name}: {reason}")]
    InvalidRequirement { name: String, reason: String },
    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("Materialization request {request_id} did not finish within the cycle timeout")]
    MaterializationTimeout { request_id: String },
    #[error("Validation error: {0}")]
    Validation(String),
}

impl SchedulerError {
    pub fn dependency_resolution(
        task_name: impl Into<String>,
        dependency: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::DependencyResolution {
            task_name: task_name.into(),
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_requirement(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequirement {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether a materialization request that hit this error should be
    /// redelivered rather than marked failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MaterializationTimeout { .. } => true,
            Self::Datastore(e) => e.is_transient(),
            Self::Messaging(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = SchedulerError::MaterializationTimeout {
            request_id: "r1".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("r1"));
    }

    #[test]
    fn test_configuration_error_is_not_retryable() {
        let err = SchedulerError::Configuration("3 templates for 2 tasks_per_job".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_datastore_error_is_retryable() {
        let transient: SchedulerError = DatastoreError::Transport("connection reset".into()).into();
        assert!(transient.is_retryable());

        let missing: SchedulerError = DatastoreError::not_found("dataset d1").into();
        assert!(!missing.is_retryable());
    }
}
