//! Request/response shapes for the orchestration layer.

use crate::models::{CacheProvenance, Job, JobEvent, TaskResult};
use crate::state_machine::JobStatus;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One submission from the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub organization_id: Uuid,
    pub task_name: String,
    pub task_version: String,
    /// Input slot name -> URI
    pub inputs: BTreeMap<String, String>,
    pub params: serde_json::Value,
    /// Engine override; defaults to the task definition's engine
    pub engine: Option<String>,
    pub use_cache: bool,
    pub idempotency_key: Option<String>,
}

impl SubmitJobRequest {
    pub fn new(
        organization_id: Uuid,
        task_name: impl Into<String>,
        task_version: impl Into<String>,
        inputs: BTreeMap<String, String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            organization_id,
            task_name: task_name.into(),
            task_version: task_version.into(),
            inputs,
            params,
            engine: None,
            use_cache: true,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Cache half of a submission response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOutcome {
    pub hit: bool,
    pub canonical_job_id: Option<Uuid>,
    pub confidence_score: Option<f64>,
    /// An entry that existed but failed the reuse policy (below threshold or
    /// expired), surfaced for inspection rather than silently served.
    pub rejected: Option<CacheProvenance>,
}

impl CacheOutcome {
    pub fn miss() -> Self {
        Self {
            hit: false,
            canonical_job_id: None,
            confidence_score: None,
            rejected: None,
        }
    }
}

/// Immediate response to a submit call. On a cache hit `job_id` is the
/// canonical job and `status` is already COMPLETED; no new job exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub cache: CacheOutcome,
}

/// Point-in-time view of a job for status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job: Job,
    pub events: Vec<JobEvent>,
    pub result: Option<TaskResult>,
}

/// In-process cancellation marks shared between the orchestrator and the
/// dispatcher. A cancel on a RUNNING job marks the hub and signals the
/// engine adapter; the dispatcher consumes the mark to distinguish a killed
/// process from an ordinary engine failure.
#[derive(Default)]
pub struct CancellationHub {
    requested: DashMap<Uuid, ()>,
}

impl CancellationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, job_id: Uuid) {
        self.requested.insert(job_id, ());
    }

    /// Consume a pending cancellation mark, if one exists.
    pub fn take(&self, job_id: Uuid) -> bool {
        self.requested.remove(&job_id).is_some()
    }

    pub fn is_requested(&self, job_id: Uuid) -> bool {
        self.requested.contains_key(&job_id)
    }
}
