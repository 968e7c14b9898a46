#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, IceProd in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # IceProd Scheduler
//!
//! Materialization, fair-share priority and queue admission for the IceProd
//! dataset scheduler.
//!
//! ## Overview
//!
//! Datasets describe many independent jobs, each expanded into the same fixed
//! set of tasks. The scheduler creates those rows lazily, scores all
//! outstanding work with a fair-share priority across users, groups and
//! datasets, and admits a bounded number of dependency-satisfied tasks per
//! cycle for execution elsewhere.
//!
//! ## Module Organization
//!
//! - [`datastore`] - the narrow interface to the remote dataset/job/task store
//! - [`priority`] - fair-share priority engine and its per-run cache
//! - [`orchestration`] - materializer, materialization service and queue admission
//! - [`messaging`] - durable queue for materialization requests
//! - [`resilience`] - retry policy applied at the datastore boundary
//! - [`config`] - layered configuration
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use iceprod_scheduler::config::SchedulerConfig;
//! use iceprod_scheduler::datastore::InMemoryDatastore;
//! use iceprod_scheduler::orchestration::{Materializer, RunOptions};
//! use iceprod_scheduler::priority::PriorityEngine;
//! use std::sync::Arc;
//!
//! # async fn example() -> iceprod_scheduler::Result<()> {
//! let config = SchedulerConfig::default();
//! let materializer = Materializer::new(
//!     Arc::new(InMemoryDatastore::new()),
//!     PriorityEngine::new(config.priority.clone()),
//!     config.materialization.clone(),
//! );
//! let finished = materializer.run_once(&RunOptions::new(100)).await?;
//! # let _ = finished;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod datastore;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod priority;
pub mod resilience;

pub use config::{ConfigManager, SchedulerConfig};
pub use constants::{status_groups, DatasetStatus, JobStatus, RequestStatus, TaskStatus};
pub use datastore::{Datastore, DatastoreError, InMemoryDatastore, RestDatastore};
pub use error::{Result, SchedulerError};
pub use messaging::{DurableQueue, InMemoryQueue, PgmqQueue};
pub use orchestration::{MaterializationService, Materializer, QueueAdmission, RunOptions};
pub use priority::{PriorityCache, PriorityEngine};
pub use resilience::{RetryPolicy, RetryingDatastore};
