//! # Job Model
//!
//! One user-submitted unit of docking work, the primary orchestration unit.
//!
//! ## Key Features
//!
//! - **Signature-based deduplication**: jobs carry the SHA-256 input
//!   signature produced by the canonicalizer, used for cache lookups
//! - **Monotonic lifecycle**: status only moves along the legal transition
//!   table; terminal states are never left
//! - **Cache provenance**: a job served from cache records which canonical
//!   job produced the reused result and at what confidence
//! - **Idempotent submission**: an optional client-supplied idempotency key
//!   maps retried submissions back to the same job
//!
//! Inputs are opaque URIs; the core never reads raw structure bytes.

use crate::state_machine::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Back-reference from a job to the cache entry that served it.
///
/// Weak by design: deleting this job never deletes the canonical job or the
/// cache entry other jobs still point to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheProvenance {
    pub canonical_job_id: Uuid,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub task_name: String,
    pub task_version: String,
    pub engine: String,
    pub status: JobStatus,
    /// Input slot name -> URI
    pub inputs: BTreeMap<String, String>,
    /// Normalized parameter map (schema defaults already merged)
    pub params: serde_json::Value,
    /// Canonical SHA-256 signature over (task, version, inputs, params)
    pub input_signature: String,
    pub idempotency_key: Option<String>,
    /// Set when this job was answered from cache instead of executed
    pub cache_provenance: Option<CacheProvenance>,
    /// Engine attempts so far (initial call + retries)
    pub attempts: u32,
    pub failure_reason: Option<String>,
    /// Last worker liveness signal while RUNNING; drives the stale reaper
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn cache_hit(&self) -> bool {
        self.cache_provenance.is_some()
    }
}

/// Job fields supplied at creation; identity and timestamps are
/// server-generated by the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub organization_id: Uuid,
    pub task_name: String,
    pub task_version: String,
    pub engine: String,
    pub inputs: BTreeMap<String, String>,
    pub params: serde_json::Value,
    pub input_signature: String,
    pub idempotency_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            task_name: "dock-v1".to_string(),
            task_version: "1.0.0".to_string(),
            engine: "vina".to_string(),
            status: JobStatus::Pending,
            inputs: BTreeMap::new(),
            params: serde_json::json!({}),
            input_signature: "0".repeat(64),
            idempotency_key: None,
            cache_provenance: None,
            attempts: 0,
            failure_reason: None,
            heartbeat_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_cache_hit_flag_follows_provenance() {
        let mut job = sample_job();
        assert!(!job.cache_hit());

        job.cache_provenance = Some(CacheProvenance {
            canonical_job_id: Uuid::new_v4(),
            confidence_score: 0.95,
        });
        assert!(job.cache_hit());
    }
}
