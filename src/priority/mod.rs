//! # Fair-Share Priority
//!
//! [`PriorityEngine`] scores datasets and tasks in `[0, 1]` from aggregate
//! statistics held in a [`PriorityCache`]. The cache is a plain value built
//! fresh for every materialization or admission run and passed down by
//! reference, so no statistics outlive the run that loaded them.

pub mod cache;
pub mod engine;

pub use cache::{DatasetSummary, PriorityCache};
pub use engine::PriorityEngine;
