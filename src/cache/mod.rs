//! # Cache Store
//!
//! Decides whether prior work can be reused for a given input signature and
//! records reuse statistics. A stored entry is only served as an actionable
//! hit when its confidence clears the configured threshold and it has not
//! expired; anything else is treated as a miss, though the entry is still
//! surfaced to the caller for inspection so low-confidence results are
//! never silently served as ground truth.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryCacheStore;
pub use postgres::PgCacheStore;

use crate::error::Result;
use crate::models::CacheEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Fields for a new or racing cache write. Two jobs completing the same
/// signature both call `put`; the store converges on the higher-confidence
/// entry.
#[derive(Debug, Clone)]
pub struct NewCacheEntry {
    pub task_name: String,
    pub task_version: String,
    pub input_signature: String,
    pub canonical_job_id: Uuid,
    pub result_id: Uuid,
    pub confidence_score: f64,
    pub ttl: Option<Duration>,
}

/// Outcome of a policy-gated cache lookup.
#[derive(Debug, Clone)]
pub enum CacheDecision {
    /// Actionable hit: confidence clears the threshold and the entry is live
    Hit(CacheEntry),
    /// Entry exists but confidence is below threshold; treated as a miss
    BelowThreshold(CacheEntry),
    /// Entry exists but its TTL elapsed; treated as a miss
    Expired(CacheEntry),
    Miss,
}

impl CacheDecision {
    pub fn is_actionable_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Reuse gating applied on top of raw lookups. The threshold is configurable
/// per task and per tenant by the orchestration layer.
#[derive(Debug, Clone, Copy)]
pub struct ReusePolicy {
    pub confidence_threshold: f64,
}

impl ReusePolicy {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
        }
    }

    pub fn decide(&self, entry: Option<CacheEntry>, now: DateTime<Utc>) -> CacheDecision {
        match entry {
            None => CacheDecision::Miss,
            Some(entry) if entry.is_expired(now) => CacheDecision::Expired(entry),
            Some(entry) if entry.confidence_score < self.confidence_threshold => {
                CacheDecision::BelowThreshold(entry)
            }
            Some(entry) => CacheDecision::Hit(entry),
        }
    }
}

/// Storage port for cached results, keyed by (task name, version, input
/// signature).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Raw lookup without policy gating.
    async fn lookup(
        &self,
        task_name: &str,
        task_version: &str,
        signature: &str,
    ) -> Result<Option<CacheEntry>>;

    /// Insert or converge an entry for a completed signature. Safe under
    /// concurrent completion of identical signatures; the entry with the
    /// higher confidence score wins and accumulated hit counts survive.
    async fn put(&self, new_entry: NewCacheEntry) -> Result<CacheEntry>;

    /// Atomically increment hit statistics for a served entry.
    async fn record_hit(&self, entry_id: Uuid) -> Result<()>;

    /// Remove one entry by id. Returns whether anything was removed.
    async fn invalidate(&self, entry_id: Uuid) -> Result<bool>;

    /// Sweep all TTL-expired entries, returning the count removed.
    async fn invalidate_expired(&self) -> Result<u64>;
}
