//! In-memory queue for embedded deployments and tests.

use super::{JobQueue, QueuedMessage};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Message {
    job_id: Uuid,
    organization_id: Uuid,
    delivery_count: u32,
    /// Invisible until this instant; set by enqueue delay and by leasing.
    visible_at: DateTime<Utc>,
    /// Receipt of the current lease holder, if leased.
    receipt: Option<Uuid>,
}

/// Single ordered message list under one mutex. Receive scans in enqueue
/// order, so lease expiry doubles as redelivery without a background sweep.
#[derive(Default)]
pub struct InMemoryJobQueue {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        job_id: Uuid,
        organization_id: Uuid,
        delay: Option<Duration>,
    ) -> Result<()> {
        let visible_at = Utc::now()
            + delay
                .map(|d| chrono::Duration::from_std(d).unwrap_or_default())
                .unwrap_or_else(chrono::Duration::zero);

        self.messages.lock().push(Message {
            job_id,
            organization_id,
            delivery_count: 0,
            visible_at,
            receipt: None,
        });
        Ok(())
    }

    async fn receive(&self, lease: Duration) -> Result<Option<QueuedMessage>> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease).unwrap_or_default();

        let mut messages = self.messages.lock();
        let Some(message) = messages.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        let receipt = Uuid::new_v4();
        message.delivery_count += 1;
        message.visible_at = now + lease;
        message.receipt = Some(receipt);

        Ok(Some(QueuedMessage {
            job_id: message.job_id,
            organization_id: message.organization_id,
            receipt,
            delivery_count: message.delivery_count,
        }))
    }

    async fn ack(&self, receipt: Uuid) -> Result<bool> {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|m| m.receipt != Some(receipt));
        Ok(messages.len() < before)
    }

    async fn depth(&self) -> Result<u64> {
        Ok(self.messages.lock().len() as u64)
    }
}
