//! In-process [`DurableQueue`] with the same lease semantics as PGMQ.

use super::{DurableQueue, LeasedRequest, MessagingError, MessagingResult};
use crate::models::MaterializationRequest;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    request: MaterializationRequest,
    visible_at: Instant,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    messages: BTreeMap<i64, Entry>,
    archived: Vec<(MaterializationRequest, String)>,
    acked: Vec<MaterializationRequest>,
}

#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages not yet acknowledged or failed, leased or not
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Failed requests with their reasons
    pub fn archived(&self) -> Vec<(MaterializationRequest, String)> {
        self.state.lock().archived.clone()
    }

    pub fn acknowledged(&self) -> Vec<MaterializationRequest> {
        self.state.lock().acked.clone()
    }

    fn remove(&self, state: &mut QueueState, message_id: i64) -> MessagingResult<Entry> {
        state
            .messages
            .remove(&message_id)
            .ok_or(MessagingError::LeaseNotFound { message_id })
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn enqueue(&self, request: &MaterializationRequest) -> MessagingResult<i64> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let message_id = state.next_id;
        state.messages.insert(
            message_id,
            Entry {
                request: request.clone(),
                visible_at: Instant::now(),
                delivery_count: 0,
            },
        );
        Ok(message_id)
    }

    async fn lease_next(&self, lease_timeout: Duration) -> MessagingResult<Option<LeasedRequest>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let Some((&message_id, entry)) = state
            .messages
            .iter_mut()
            .find(|(_, entry)| entry.visible_at <= now)
        else {
            return Ok(None);
        };

        entry.visible_at = now + lease_timeout;
        entry.delivery_count += 1;
        Ok(Some(LeasedRequest {
            message_id,
            delivery_count: entry.delivery_count,
            request: entry.request.clone(),
        }))
    }

    async fn ack(&self, leased: &LeasedRequest) -> MessagingResult<()> {
        let mut state = self.state.lock();
        let entry = self.remove(&mut state, leased.message_id)?;
        state.acked.push(entry.request);
        Ok(())
    }

    async fn nack_requeue(&self, leased: &LeasedRequest) -> MessagingResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .messages
            .get_mut(&leased.message_id)
            .ok_or(MessagingError::LeaseNotFound {
                message_id: leased.message_id,
            })?;
        entry.visible_at = Instant::now();
        Ok(())
    }

    async fn fail(&self, leased: &LeasedRequest, reason: &str) -> MessagingResult<()> {
        let mut state = self.state.lock();
        let entry = self.remove(&mut state, leased.message_id)?;
        state.archived.push((entry.request, reason.to_string()));
        Ok(())
    }
}
