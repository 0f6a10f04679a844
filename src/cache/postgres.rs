//! Postgres-backed cache store.
//!
//! Concurrency is pushed into the database: racing `put` calls for the same
//! signature converge through a conditional upsert that only replaces a row
//! when the incoming confidence is higher, and hit counting is a single
//! `hit_count = hit_count + 1` update, never a read-modify-write.
//!
//! Expected schema (`result_cache`): unique key on
//! (task_name, task_version, input_signature).

use super::{CacheStore, NewCacheEntry};
use crate::error::Result;
use crate::models::CacheEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &PgRow) -> std::result::Result<CacheEntry, sqlx::Error> {
    Ok(CacheEntry {
        id: row.try_get("id")?,
        task_name: row.try_get("task_name")?,
        task_version: row.try_get("task_version")?,
        input_signature: row.try_get("input_signature")?,
        canonical_job_id: row.try_get("canonical_job_id")?,
        result_id: row.try_get("result_id")?,
        confidence_score: row.try_get("confidence_score")?,
        hit_count: row.try_get::<i64, _>("hit_count")? as u64,
        last_used_at: row.try_get("last_used_at")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const ENTRY_COLUMNS: &str = "id, task_name, task_version, input_signature, canonical_job_id, \
                             result_id, confidence_score, hit_count, last_used_at, expires_at, \
                             created_at";

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn lookup(
        &self,
        task_name: &str,
        task_version: &str,
        signature: &str,
    ) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM result_cache \
             WHERE task_name = $1 AND task_version = $2 AND input_signature = $3"
        ))
        .bind(task_name)
        .bind(task_version)
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(entry_from_row).transpose()?)
    }

    async fn put(&self, new_entry: NewCacheEntry) -> Result<CacheEntry> {
        let now = Utc::now();
        let expires_at: Option<DateTime<Utc>> = new_entry
            .ttl
            .map(|ttl| now + chrono::Duration::from_std(ttl).unwrap_or_default());

        // The DO UPDATE is conditional on strictly higher confidence, so the
        // converged row is the confidence-max over racing writers. When the
        // condition fails nothing is returned and the surviving row is read
        // back instead.
        let row = sqlx::query(&format!(
            "INSERT INTO result_cache \
                 (id, task_name, task_version, input_signature, canonical_job_id, result_id, \
                  confidence_score, hit_count, last_used_at, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $8) \
             ON CONFLICT (task_name, task_version, input_signature) DO UPDATE SET \
                 canonical_job_id = EXCLUDED.canonical_job_id, \
                 result_id = EXCLUDED.result_id, \
                 confidence_score = EXCLUDED.confidence_score, \
                 expires_at = EXCLUDED.expires_at \
             WHERE result_cache.confidence_score < EXCLUDED.confidence_score \
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new_entry.task_name)
        .bind(&new_entry.task_version)
        .bind(&new_entry.input_signature)
        .bind(new_entry.canonical_job_id)
        .bind(new_entry.result_id)
        .bind(new_entry.confidence_score)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(entry_from_row(&row)?);
        }

        self.lookup(
            &new_entry.task_name,
            &new_entry.task_version,
            &new_entry.input_signature,
        )
        .await?
        .ok_or_else(|| crate::error::MoldockError::not_found("cache entry"))
    }

    async fn record_hit(&self, entry_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE result_cache SET hit_count = hit_count + 1, last_used_at = NOW() \
             WHERE id = $1",
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate(&self, entry_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM result_cache WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn invalidate_expired(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM result_cache WHERE expires_at IS NOT NULL AND expires_at <= NOW()")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
