//! # Scheduler Configuration
//!
//! Layered configuration: a base TOML file, an optional per-environment TOML
//! file, then `ICEPROD__SECTION__FIELD` environment variables. Every section
//! carries defaults, so a missing file still yields a runnable configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use iceprod_scheduler::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let timeout = manager.config().materialization.cycle_timeout_seconds;
//! # let _ = timeout;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::TaskStatus;
use crate::datastore::RestDatastoreConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/scheduler.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// REST datastore connection
    pub datastore: RestDatastoreConfig,

    /// Retry policy applied at the datastore boundary
    pub retry: RetryConfig,

    /// Fair-share priority constants
    pub priority: PriorityConfig,

    /// Materializer and materialization service settings
    pub materialization: MaterializationConfig,

    /// Queue admission cycle settings
    pub queue_admission: QueueAdmissionConfig,

    /// PGMQ durable queue for materialization requests
    pub pgmq: PgmqConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Empirically tuned priority constants
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// Divisor applied to a dataset's share of active tasks
    pub size_penalty_divisor: f64,
    /// Divisor applied to `task_index / tasks_per_job`
    pub finishing_bonus_divisor: f64,
    /// Divisor applied to the remaining-jobs fraction
    pub early_job_divisor: f64,
    /// Jobs below this index get the initial-ramp boost
    pub ramp_job_threshold: u64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            size_penalty_divisor: 5.0,
            finishing_bonus_divisor: 10.0,
            early_job_divisor: 100.0,
            ramp_job_threshold: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MaterializationConfig {
    /// Wall-clock budget for one materialization pass
    pub cycle_timeout_seconds: u64,
    /// Jobs to buffer per dataset when a request does not say
    pub default_num_jobs: u64,
    /// Added to the cycle timeout to form the request lease
    pub lease_margin_seconds: u64,
    /// Sleep between polls of an empty request queue
    pub poll_interval_seconds: u64,
    /// Deliveries after which a request is failed instead of retried
    pub max_delivery_attempts: u32,
    /// Status given to newly created tasks
    pub default_task_status: TaskStatus,
}

impl Default for MaterializationConfig {
    fn default() -> Self {
        Self {
            cycle_timeout_seconds: 120,
            default_num_jobs: 1000,
            lease_margin_seconds: 30,
            poll_interval_seconds: 10,
            max_delivery_attempts: 5,
            default_task_status: TaskStatus::Idle,
        }
    }
}

impl MaterializationConfig {
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_seconds)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_seconds + self.lease_margin_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueAdmissionConfig {
    /// Cap on tasks sitting in `waiting`
    pub max_total_ready: u64,
    /// Cap on tasks admitted in one cycle
    pub max_per_cycle: u64,
    /// Candidates fetched per admission slot
    pub overfetch_factor: usize,
    pub max_concurrent_dependency_checks: usize,
    /// Task ids per bulk status call
    pub bulk_batch_size: usize,
    /// Schedule for the admission cycle in the scheduler binary
    pub interval_seconds: u64,
}

impl Default for QueueAdmissionConfig {
    fn default() -> Self {
        Self {
            max_total_ready: 10_000,
            max_per_cycle: 1_000,
            overfetch_factor: 5,
            max_concurrent_dependency_checks: 20,
            bulk_batch_size: 100,
            interval_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PgmqConfig {
    pub database_url: String,
    pub queue_name: String,
    pub max_connections: u32,
}

impl Default for PgmqConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/iceprod".to_string(),
            queue_name: "materialization_requests".to_string(),
            max_connections: 5,
        }
    }
}

impl SchedulerConfig {
    /// Reject values that would stall or divide by zero at runtime
    pub fn validate(&self) -> ConfigResult<()> {
        if self.datastore.base_url.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "datastore.base_url",
                "",
                "must not be empty",
            ));
        }
        if self.datastore.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "datastore.timeout_ms",
                0,
                "must be positive",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                0,
                "must allow at least one attempt",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                self.retry.multiplier,
                "must be at least 1.0",
            ));
        }

        let divisors = [
            ("priority.size_penalty_divisor", self.priority.size_penalty_divisor),
            ("priority.finishing_bonus_divisor", self.priority.finishing_bonus_divisor),
            ("priority.early_job_divisor", self.priority.early_job_divisor),
        ];
        for (field, value) in divisors {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigurationError::invalid_value(field, value, "must be positive"));
            }
        }

        if self.materialization.cycle_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "materialization.cycle_timeout_seconds",
                0,
                "must be positive",
            ));
        }
        if self.materialization.max_delivery_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "materialization.max_delivery_attempts",
                0,
                "must allow at least one delivery",
            ));
        }

        let admission = &self.queue_admission;
        if admission.overfetch_factor == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue_admission.overfetch_factor",
                0,
                "must be positive",
            ));
        }
        if admission.max_concurrent_dependency_checks == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue_admission.max_concurrent_dependency_checks",
                0,
                "must be positive",
            ));
        }
        if admission.bulk_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue_admission.bulk_batch_size",
                0,
                "must be positive",
            ));
        }

        if self.pgmq.queue_name.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "pgmq.queue_name",
                "",
                "must not be empty",
            ));
        }

        Ok(())
    }
}
