//! # PGMQ Request Queue
//!
//! [`DurableQueue`] over the PGMQ PostgreSQL extension, called through plain
//! SQL on a shared sqlx pool. A lease is a PGMQ visibility timeout: `read`
//! hides the message, `set_vt(..., 0)` requeues it, `delete` acknowledges it
//! and `archive` parks failures in the queue's archive table.

use super::{DurableQueue, LeasedRequest, MessagingError, MessagingResult};
use crate::config::PgmqConfig;
use crate::models::MaterializationRequest;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    msg_id: i64,
    read_ct: i32,
    message: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct PgmqQueue {
    pool: PgPool,
    queue_name: String,
}

impl PgmqQueue {
    /// Connect and make sure the queue exists
    pub async fn connect(config: &PgmqConfig) -> MessagingResult<Self> {
        info!(queue = %config.queue_name, "🚀 Connecting to pgmq");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;

        let queue = Self::new_with_pool(pool, &config.queue_name);
        queue.ensure_queue().await?;

        info!(queue = %queue.queue_name, "✅ Connected to pgmq");
        Ok(queue)
    }

    /// Use an existing pool (no queue creation)
    pub fn new_with_pool(pool: PgPool, queue_name: &str) -> Self {
        Self {
            pool,
            queue_name: queue_name.to_string(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// `pgmq.create` is idempotent
    pub async fn ensure_queue(&self) -> MessagingResult<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(&self.queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| self.operation_error("create", e))?;
        debug!(queue = %self.queue_name, "📋 Queue ready");
        Ok(())
    }

    fn operation_error(&self, operation: &str, err: sqlx::Error) -> MessagingError {
        MessagingError::queue_operation(&self.queue_name, operation, err.to_string())
    }

    async fn archive_message(&self, message_id: i64) -> MessagingResult<bool> {
        let archived: bool = sqlx::query_scalar("SELECT pgmq.archive($1::text, $2::bigint)")
            .bind(&self.queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.operation_error("archive", e))?;
        Ok(archived)
    }
}

#[async_trait]
impl DurableQueue for PgmqQueue {
    async fn enqueue(&self, request: &MaterializationRequest) -> MessagingResult<i64> {
        let payload = serde_json::to_value(request)?;
        let message_id: i64 = sqlx::query_scalar("SELECT * FROM pgmq.send($1::text, $2::jsonb)")
            .bind(&self.queue_name)
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.operation_error("send", e))?;

        debug!(
            queue = %self.queue_name,
            message_id = message_id,
            request_id = %request.request_id,
            "📤 Materialization request enqueued"
        );
        Ok(message_id)
    }

    async fn lease_next(&self, lease_timeout: Duration) -> MessagingResult<Option<LeasedRequest>> {
        let vt = i32::try_from(lease_timeout.as_secs()).unwrap_or(i32::MAX);
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT msg_id, read_ct, message FROM pgmq.read($1::text, $2::integer, 1)",
        )
        .bind(&self.queue_name)
        .bind(vt)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.operation_error("read", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        match serde_json::from_value::<MaterializationRequest>(row.message) {
            Ok(request) => Ok(Some(LeasedRequest {
                message_id: row.msg_id,
                delivery_count: u32::try_from(row.read_ct).unwrap_or(0),
                request,
            })),
            Err(e) => {
                // Undecodable payloads would otherwise be redelivered forever
                error!(
                    queue = %self.queue_name,
                    message_id = row.msg_id,
                    error = %e,
                    "❌ Archiving undecodable materialization request"
                );
                self.archive_message(row.msg_id).await?;
                Err(e.into())
            }
        }
    }

    async fn ack(&self, leased: &LeasedRequest) -> MessagingResult<()> {
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1::text, $2::bigint)")
            .bind(&self.queue_name)
            .bind(leased.message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.operation_error("delete", e))?;

        if !deleted {
            return Err(MessagingError::LeaseNotFound {
                message_id: leased.message_id,
            });
        }
        Ok(())
    }

    async fn nack_requeue(&self, leased: &LeasedRequest) -> MessagingResult<()> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT msg_id FROM pgmq.set_vt($1::text, $2::bigint, 0)")
                .bind(&self.queue_name)
                .bind(leased.message_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| self.operation_error("set_vt", e))?;

        if row.is_none() {
            return Err(MessagingError::LeaseNotFound {
                message_id: leased.message_id,
            });
        }
        Ok(())
    }

    async fn fail(&self, leased: &LeasedRequest, reason: &str) -> MessagingResult<()> {
        warn!(
            queue = %self.queue_name,
            message_id = leased.message_id,
            request_id = %leased.request.request_id,
            reason = %reason,
            "📦 Archiving failed materialization request"
        );
        if !self.archive_message(leased.message_id).await? {
            return Err(MessagingError::LeaseNotFound {
                message_id: leased.message_id,
            });
        }
        Ok(())
    }
}
