//! # Orchestration
//!
//! The scheduler's work-producing core.
//!
//! ## Core Components
//!
//! - **Materializer**: expands datasets into job and task rows, repairing
//!   partially buffered jobs, wiring dependencies and assigning priorities
//! - **MaterializationService**: durable-queue consumer driving the materializer
//! - **QueueAdmission**: periodic promotion of dependency-satisfied idle tasks
//! - **dependency_resolution** / **requirements**: template parsing used while
//!   tasks are created

pub mod dependency_resolution;
pub mod materialization_service;
pub mod materializer;
pub mod queue_admission;
pub mod requirements;

pub use dependency_resolution::{DependencyToken, TaskReference};
pub use materialization_service::{MaterializationService, ProcessOutcome};
pub use materializer::{BufferJob, DatasetOutcome, Materializer, RunContext, RunOptions};
pub use queue_admission::{AdmissionReport, QueueAdmission};
