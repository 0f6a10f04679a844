//! # Job Queue
//!
//! At-least-once delivery between submission and the worker pool. A received
//! message carries a receipt and stays invisible for the lease duration; a
//! worker that dies without acking loses the lease and the message is
//! redelivered with a bumped delivery count. Dispatch must therefore stay
//! idempotent, which the repository's compare-and-set claim guarantees.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryJobQueue;
pub use postgres::PgJobQueue;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// A leased queue message. `receipt` is only valid while the lease holds.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub job_id: Uuid,
    pub organization_id: Uuid,
    pub receipt: Uuid,
    pub delivery_count: u32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Make a job available for dispatch, optionally after a delay (used for
    /// retry backoff).
    async fn enqueue(
        &self,
        job_id: Uuid,
        organization_id: Uuid,
        delay: Option<Duration>,
    ) -> Result<()>;

    /// Lease the oldest visible message, if any. The message becomes
    /// invisible to other receivers until `lease` elapses or it is acked.
    async fn receive(&self, lease: Duration) -> Result<Option<QueuedMessage>>;

    /// Remove a leased message. Returns `false` when the receipt is no
    /// longer valid (lease expired and the message was redelivered).
    async fn ack(&self, receipt: Uuid) -> Result<bool>;

    /// Messages currently visible or leased.
    async fn depth(&self) -> Result<u64>;
}
