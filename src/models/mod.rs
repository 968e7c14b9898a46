pub mod dataset;
pub mod job;
pub mod materialization_request;
pub mod task;
pub mod user;

// Re-export core models for easy access
pub use dataset::{Dataset, DatasetConfig, RawDependency, TaskTemplate};
pub use job::{Job, NewJob};
pub use materialization_request::MaterializationRequest;
pub use task::{NewTask, Requirements, Task, TaskOptions};
pub use user::{Group, User};
