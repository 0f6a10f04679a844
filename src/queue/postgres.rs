//! Postgres-backed queue.
//!
//! Leasing uses `FOR UPDATE SKIP LOCKED` inside a single UPDATE so two
//! workers polling concurrently never lease the same message. Visibility is
//! a timestamp column; lease expiry needs no sweeper because expired leases
//! simply become visible to the next receive.
//!
//! Expected schema (`job_queue`): id, job_id, organization_id,
//! delivery_count, visible_at, receipt, created_at.

use super::{JobQueue, QueuedMessage};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        job_id: Uuid,
        organization_id: Uuid,
        delay: Option<Duration>,
    ) -> Result<()> {
        let delay_secs = delay.map(|d| d.as_secs_f64()).unwrap_or(0.0);
        sqlx::query(
            "INSERT INTO job_queue (id, job_id, organization_id, delivery_count, visible_at, created_at) \
             VALUES ($1, $2, $3, 0, NOW() + make_interval(secs => $4), NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(organization_id)
        .bind(delay_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn receive(&self, lease: Duration) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query(
            "UPDATE job_queue SET \
                 delivery_count = delivery_count + 1, \
                 visible_at = NOW() + make_interval(secs => $1), \
                 receipt = $2 \
             WHERE id = ( \
                 SELECT id FROM job_queue WHERE visible_at <= NOW() \
                 ORDER BY created_at ASC LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING job_id, organization_id, receipt, delivery_count",
        )
        .bind(lease.as_secs_f64())
        .bind(Uuid::new_v4())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(QueuedMessage {
            job_id: row.try_get("job_id")?,
            organization_id: row.try_get("organization_id")?,
            receipt: row.try_get("receipt")?,
            delivery_count: row.try_get::<i32, _>("delivery_count")? as u32,
        }))
    }

    async fn ack(&self, receipt: Uuid) -> Result<bool> {
        // Acking also requires the lease to still hold; a redelivered
        // message has a new receipt, so the stale one matches nothing.
        let result = sqlx::query("DELETE FROM job_queue WHERE receipt = $1 AND visible_at > NOW()")
            .bind(receipt)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn depth(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
