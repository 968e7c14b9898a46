//! # Durable Request Queue
//!
//! Materialization requests travel through a [`DurableQueue`]: leased by the
//! materialization service, then acknowledged, requeued for redelivery or
//! failed. [`PgmqQueue`] stores them in PostgreSQL through the PGMQ extension;
//! [`InMemoryQueue`] gives tests the same lease semantics without a database.

pub mod errors;
pub mod memory;
pub mod pgmq_queue;

use crate::models::MaterializationRequest;
use async_trait::async_trait;
use std::time::Duration;

pub use errors::{MessagingError, MessagingResult};
pub use memory::InMemoryQueue;
pub use pgmq_queue::PgmqQueue;

/// A request currently leased by one consumer
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedRequest {
    pub message_id: i64,
    /// How many times this message has been handed out, including this lease
    pub delivery_count: u32,
    pub request: MaterializationRequest,
}

#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Store a new request, returning its message id
    async fn enqueue(&self, request: &MaterializationRequest) -> MessagingResult<i64>;

    /// Lease the oldest visible request, hiding it for `lease_timeout`.
    /// An expired lease makes the request visible again.
    async fn lease_next(&self, lease_timeout: Duration) -> MessagingResult<Option<LeasedRequest>>;

    /// Processing succeeded; remove the request
    async fn ack(&self, leased: &LeasedRequest) -> MessagingResult<()>;

    /// Processing should be retried; make the request visible again now
    async fn nack_requeue(&self, leased: &LeasedRequest) -> MessagingResult<()>;

    /// Processing failed for good; move the request out of the queue
    async fn fail(&self, leased: &LeasedRequest, reason: &str) -> MessagingResult<()>;
}
