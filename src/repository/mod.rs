//! # Job Repository
//!
//! Tenant-scoped durable storage for jobs, executions, results, and the
//! append-only event log. Every read and write is scoped by organization id
//! inside the adapter itself; callers cannot opt out, so a bug in the
//! orchestration layer cannot leak cross-tenant data. Lookups that cross a
//! tenant boundary return `NotFound`, indistinguishable from absence.
//!
//! Status changes go through compare-and-set transitions validated against
//! the state machine; an illegal transition is rejected with a
//! `StateTransition` error, and a lost claim race reports `false` rather
//! than corrupting state.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryJobRepository;
pub use postgres::PgJobRepository;

use crate::error::Result;
use crate::models::{Job, JobEvent, NewJob, NewTaskExecution, TaskExecution, TaskResult};
use crate::state_machine::{ExecutionStatus, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Listing filters; all optional, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct JobFilters {
    pub status: Option<JobStatus>,
    pub task_name: Option<String>,
    pub engine: Option<String>,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 25,
        }
    }
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

/// Storage port for the job lifecycle.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new PENDING job with a server-generated identity. Rejects
    /// jobs without an organization id. If the job carries an idempotency
    /// key already mapped for this tenant, the previously created job is
    /// returned instead of a duplicate.
    async fn create_job(&self, new_job: NewJob) -> Result<Job>;

    /// Tenant-scoped fetch; cross-tenant lookups are `NotFound`.
    async fn get_job(&self, job_id: Uuid, organization_id: Uuid) -> Result<Job>;

    /// Replay lookup for client idempotency keys.
    async fn find_by_idempotency_key(
        &self,
        organization_id: Uuid,
        key: &str,
    ) -> Result<Option<Job>>;

    /// Stable-ordered listing (creation time descending, id as tiebreaker)
    /// so pagination never skips or repeats rows.
    async fn list_jobs(
        &self,
        organization_id: Uuid,
        filters: JobFilters,
        page: PageRequest,
    ) -> Result<Page<Job>>;

    /// Compare-and-set status transition.
    ///
    /// Validates (expected -> to) against the state machine first; an
    /// illegal pair is a `StateTransition` error. Returns `true` if this call
    /// won the transition, `false` if the current status no longer matches
    /// `expected` (a concurrent writer got there first).
    async fn transition_status(
        &self,
        job_id: Uuid,
        organization_id: Uuid,
        expected: JobStatus,
        to: JobStatus,
        failure_reason: Option<String>,
    ) -> Result<bool>;

    /// Append to the job's ordered event log; sequence numbers are strictly
    /// monotonic per job.
    async fn append_event(
        &self,
        job_id: Uuid,
        organization_id: Uuid,
        event_type: &str,
        detail: Option<serde_json::Value>,
    ) -> Result<JobEvent>;

    /// Events in sequence order.
    async fn list_events(&self, job_id: Uuid, organization_id: Uuid) -> Result<Vec<JobEvent>>;

    /// Bump the attempt counter, returning the new value.
    async fn increment_attempts(&self, job_id: Uuid, organization_id: Uuid) -> Result<u32>;

    /// Worker liveness signal for RUNNING jobs; consumed by the reaper.
    async fn update_heartbeat(&self, job_id: Uuid, organization_id: Uuid) -> Result<()>;

    /// PENDING + RUNNING jobs for a tenant, for quota enforcement.
    async fn count_active(&self, organization_id: Uuid) -> Result<u64>;

    /// RUNNING jobs whose heartbeat is older than the cutoff, across all
    /// tenants. Reaper-only path.
    async fn stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>>;

    async fn create_execution(&self, new_execution: NewTaskExecution) -> Result<TaskExecution>;

    /// Terminalize an execution record.
    async fn finish_execution(
        &self,
        execution_id: Uuid,
        organization_id: Uuid,
        status: ExecutionStatus,
        error_detail: Option<String>,
    ) -> Result<()>;

    /// Store an immutable result; one per completed execution.
    async fn store_result(&self, result: TaskResult) -> Result<()>;

    /// Latest result for a job, tenant-scoped.
    async fn get_result(&self, job_id: Uuid, organization_id: Uuid) -> Result<Option<TaskResult>>;
}
