//! Cache entry keyed by (task name, task version, input signature).
//!
//! Shared across jobs: many jobs may reference one entry as provenance, so
//! entries are only removed by TTL expiry or explicit invalidation, never by
//! job deletion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: Uuid,
    pub task_name: String,
    pub task_version: String,
    pub input_signature: String,
    /// The job whose completion produced the cached result
    pub canonical_job_id: Uuid,
    /// The stored result the entry points at
    pub result_id: Uuid,
    pub confidence_score: f64,
    pub hit_count: u64,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}
