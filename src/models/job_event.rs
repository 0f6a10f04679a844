//! Append-only ordered event log for a job. Sequence numbers are strictly
//! monotonic per job; the log is a superset of status changes and is never
//! mutated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub organization_id: Uuid,
    /// Monotonically increasing per job, starting at 1
    pub sequence: u64,
    pub event_type: String,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Event type names written by the orchestration layer.
pub mod event_types {
    pub const QUEUED: &str = "QUEUED";
    pub const DISPATCHED: &str = "DISPATCHED";
    pub const TASK_STARTED: &str = "TASK_STARTED";
    pub const TASK_COMPLETED: &str = "TASK_COMPLETED";
    pub const TASK_FAILED: &str = "TASK_FAILED";
    pub const RETRY_SCHEDULED: &str = "RETRY_SCHEDULED";
    pub const COMPLETED: &str = "COMPLETED";
    pub const FAILED: &str = "FAILED";
    pub const CANCEL_REQUESTED: &str = "CANCEL_REQUESTED";
    pub const CANCELLED: &str = "CANCELLED";
    pub const REAPED: &str = "REAPED";
}
