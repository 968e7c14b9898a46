//! # Resilience Module
//!
//! One retry policy, applied at the datastore boundary. Business logic never
//! retries on its own; it sees either a success or the final error.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use iceprod_scheduler::datastore::{RestDatastore, RestDatastoreConfig};
//! use iceprod_scheduler::resilience::{RetryPolicy, RetryingDatastore};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let rest = RestDatastore::new(RestDatastoreConfig::default())?;
//! let datastore = RetryingDatastore::new(rest, RetryPolicy::default());
//! # let _ = datastore;
//! # Ok(())
//! # }
//! ```

pub mod retry;
pub mod retrying_datastore;

pub use retry::RetryPolicy;
pub use retrying_datastore::RetryingDatastore;
