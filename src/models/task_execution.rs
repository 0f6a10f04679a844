//! One engine invocation belonging to a job. A job retried after a
//! transient failure accumulates multiple executions, one per attempt.

use crate::state_machine::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    pub job_id: Uuid,
    pub organization_id: Uuid,
    pub task_name: String,
    pub task_version: String,
    pub engine: String,
    /// 1-based attempt number within the job
    pub attempt: u32,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

impl TaskExecution {
    pub fn execution_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Execution fields supplied at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTaskExecution {
    pub job_id: Uuid,
    pub organization_id: Uuid,
    pub task_name: String,
    pub task_version: String,
    pub engine: String,
    pub attempt: u32,
}
