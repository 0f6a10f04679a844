//! In-memory job repository for embedded deployments and tests.
//!
//! A single write lock per mutation gives the same atomicity the Postgres
//! adapter gets from conditional updates: a compare-and-set transition
//! checks and swaps status under the lock, so two workers racing to claim
//! the same job see exactly one winner.

use super::{JobFilters, JobRepository, Page, PageRequest};
use crate::error::{MoldockError, Result, ValidationViolation};
use crate::models::{Job, JobEvent, NewJob, NewTaskExecution, TaskExecution, TaskResult};
use crate::state_machine::{self, ExecutionStatus, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Store {
    jobs: HashMap<Uuid, Job>,
    events: HashMap<Uuid, Vec<JobEvent>>,
    executions: HashMap<Uuid, TaskExecution>,
    /// Results by job id, newest last
    results: HashMap<Uuid, Vec<TaskResult>>,
    idempotency: HashMap<(Uuid, String), Uuid>,
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    store: RwLock<Store>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn scoped_job(store: &Store, job_id: Uuid, organization_id: Uuid) -> Result<Job> {
        store
            .jobs
            .get(&job_id)
            .filter(|job| job.organization_id == organization_id)
            .cloned()
            .ok_or_else(|| MoldockError::not_found("job"))
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_job(&self, new_job: NewJob) -> Result<Job> {
        if new_job.organization_id.is_nil() {
            return Err(MoldockError::Validation(vec![ValidationViolation::new(
                "organization_id",
                "job must belong to an organization",
            )]));
        }

        let mut store = self.store.write();

        if let Some(key) = &new_job.idempotency_key {
            let mapping = (new_job.organization_id, key.clone());
            if let Some(existing_id) = store.idempotency.get(&mapping) {
                if let Some(existing) = store.jobs.get(existing_id) {
                    return Ok(existing.clone());
                }
            }
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            organization_id: new_job.organization_id,
            task_name: new_job.task_name,
            task_version: new_job.task_version,
            engine: new_job.engine,
            status: JobStatus::Pending,
            inputs: new_job.inputs,
            params: new_job.params,
            input_signature: new_job.input_signature,
            idempotency_key: new_job.idempotency_key.clone(),
            cache_provenance: None,
            attempts: 0,
            failure_reason: None,
            heartbeat_at: None,
            created_at: now,
            updated_at: now,
        };

        if let Some(key) = &new_job.idempotency_key {
            store
                .idempotency
                .insert((job.organization_id, key.clone()), job.id);
        }
        store.jobs.insert(job.id, job.clone());
        store.events.insert(job.id, Vec::new());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid, organization_id: Uuid) -> Result<Job> {
        Self::scoped_job(&self.store.read(), job_id, organization_id)
    }

    async fn find_by_idempotency_key(
        &self,
        organization_id: Uuid,
        key: &str,
    ) -> Result<Option<Job>> {
        let store = self.store.read();
        Ok(store
            .idempotency
            .get(&(organization_id, key.to_string()))
            .and_then(|id| store.jobs.get(id))
            .cloned())
    }

    async fn list_jobs(
        &self,
        organization_id: Uuid,
        filters: JobFilters,
        page: PageRequest,
    ) -> Result<Page<Job>> {
        let store = self.store.read();
        let mut matching: Vec<&Job> = store
            .jobs
            .values()
            .filter(|job| job.organization_id == organization_id)
            .filter(|job| filters.status.is_none_or(|status| job.status == status))
            .filter(|job| {
                filters
                    .task_name
                    .as_deref()
                    .is_none_or(|name| job.task_name == name)
            })
            .filter(|job| {
                filters
                    .engine
                    .as_deref()
                    .is_none_or(|engine| job.engine == engine)
            })
            .collect();

        // Creation time descending with id tiebreaker keeps page boundaries
        // stable across calls.
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            page: page.page.max(1),
            per_page: page.per_page,
            total,
        })
    }

    async fn transition_status(
        &self,
        job_id: Uuid,
        organization_id: Uuid,
        expected: JobStatus,
        to: JobStatus,
        failure_reason: Option<String>,
    ) -> Result<bool> {
        state_machine::verify_transition(expected, to)?;

        let mut store = self.store.write();
        let job = store
            .jobs
            .get_mut(&job_id)
            .filter(|job| job.organization_id == organization_id)
            .ok_or_else(|| MoldockError::not_found("job"))?;

        if job.status != expected {
            return Ok(false);
        }

        job.status = to;
        job.updated_at = Utc::now();
        if to == JobStatus::Running {
            job.heartbeat_at = Some(job.updated_at);
        }
        if let Some(reason) = failure_reason {
            job.failure_reason = Some(reason);
        }
        Ok(true)
    }

    async fn append_event(
        &self,
        job_id: Uuid,
        organization_id: Uuid,
        event_type: &str,
        detail: Option<serde_json::Value>,
    ) -> Result<JobEvent> {
        let mut store = self.store.write();
        Self::scoped_job(&store, job_id, organization_id)?;

        let log = store.events.entry(job_id).or_default();
        let event = JobEvent {
            job_id,
            organization_id,
            sequence: log.len() as u64 + 1,
            event_type: event_type.to_string(),
            detail,
            created_at: Utc::now(),
        };
        log.push(event.clone());
        Ok(event)
    }

    async fn list_events(&self, job_id: Uuid, organization_id: Uuid) -> Result<Vec<JobEvent>> {
        let store = self.store.read();
        Self::scoped_job(&store, job_id, organization_id)?;
        Ok(store.events.get(&job_id).cloned().unwrap_or_default())
    }

    async fn increment_attempts(&self, job_id: Uuid, organization_id: Uuid) -> Result<u32> {
        let mut store = self.store.write();
        let job = store
            .jobs
            .get_mut(&job_id)
            .filter(|job| job.organization_id == organization_id)
            .ok_or_else(|| MoldockError::not_found("job"))?;
        job.attempts += 1;
        Ok(job.attempts)
    }

    async fn update_heartbeat(&self, job_id: Uuid, organization_id: Uuid) -> Result<()> {
        let mut store = self.store.write();
        let job = store
            .jobs
            .get_mut(&job_id)
            .filter(|job| job.organization_id == organization_id)
            .ok_or_else(|| MoldockError::not_found("job"))?;
        job.heartbeat_at = Some(Utc::now());
        Ok(())
    }

    async fn count_active(&self, organization_id: Uuid) -> Result<u64> {
        let store = self.store.read();
        Ok(store
            .jobs
            .values()
            .filter(|job| job.organization_id == organization_id)
            .filter(|job| matches!(job.status, JobStatus::Pending | JobStatus::Running))
            .count() as u64)
    }

    async fn stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let store = self.store.read();
        Ok(store
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .filter(|job| job.heartbeat_at.is_none_or(|beat| beat < cutoff))
            .cloned()
            .collect())
    }

    async fn create_execution(&self, new_execution: NewTaskExecution) -> Result<TaskExecution> {
        let mut store = self.store.write();
        Self::scoped_job(&store, new_execution.job_id, new_execution.organization_id)?;

        let execution = TaskExecution {
            id: Uuid::new_v4(),
            job_id: new_execution.job_id,
            organization_id: new_execution.organization_id,
            task_name: new_execution.task_name,
            task_version: new_execution.task_version,
            engine: new_execution.engine,
            attempt: new_execution.attempt,
            status: ExecutionStatus::Running,
            started_at: Some(Utc::now()),
            completed_at: None,
            error_detail: None,
        };
        store.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        organization_id: Uuid,
        status: ExecutionStatus,
        error_detail: Option<String>,
    ) -> Result<()> {
        let mut store = self.store.write();
        let execution = store
            .executions
            .get_mut(&execution_id)
            .filter(|execution| execution.organization_id == organization_id)
            .ok_or_else(|| MoldockError::not_found("task execution"))?;

        execution.status = status;
        execution.completed_at = Some(Utc::now());
        execution.error_detail = error_detail;
        Ok(())
    }

    async fn store_result(&self, result: TaskResult) -> Result<()> {
        let mut store = self.store.write();
        Self::scoped_job(&store, result.job_id, result.organization_id)?;
        store.results.entry(result.job_id).or_default().push(result);
        Ok(())
    }

    async fn get_result(&self, job_id: Uuid, organization_id: Uuid) -> Result<Option<TaskResult>> {
        let store = self.store.read();
        Self::scoped_job(&store, job_id, organization_id)?;
        Ok(store
            .results
            .get(&job_id)
            .and_then(|results| results.last())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn new_job(organization_id: Uuid) -> NewJob {
        NewJob {
            organization_id,
            task_name: "dock-v1".to_string(),
            task_version: "1.0.0".to_string(),
            engine: "vina".to_string(),
            inputs: BTreeMap::new(),
            params: json!({}),
            input_signature: "a".repeat(64),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_missing_organization() {
        let repo = InMemoryJobRepository::new();
        let err = repo.create_job(new_job(Uuid::nil())).await.unwrap_err();
        assert!(matches!(err, MoldockError::Validation(_)));
    }

    #[tokio::test]
    async fn test_tenant_scoping_is_indistinguishable_from_absence() {
        let repo = InMemoryJobRepository::new();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let job = repo.create_job(new_job(org_a)).await.unwrap();

        let cross_tenant = repo.get_job(job.id, org_b).await.unwrap_err();
        let missing = repo.get_job(Uuid::new_v4(), org_b).await.unwrap_err();
        assert_eq!(cross_tenant.to_string(), missing.to_string());
    }

    #[tokio::test]
    async fn test_idempotency_key_replays_same_job() {
        let repo = InMemoryJobRepository::new();
        let org = Uuid::new_v4();
        let mut request = new_job(org);
        request.idempotency_key = Some("req-123".to_string());

        let first = repo.create_job(request.clone()).await.unwrap();
        let second = repo.create_job(request).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_transition_cas_has_one_winner() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let org = Uuid::new_v4();
        let job = repo.create_job(new_job(org)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let job_id = job.id;
            handles.push(tokio::spawn(async move {
                repo.transition_status(job_id, org, JobStatus::Pending, JobStatus::Running, None)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected_and_status_unchanged() {
        let repo = InMemoryJobRepository::new();
        let org = Uuid::new_v4();
        let job = repo.create_job(new_job(org)).await.unwrap();

        repo.transition_status(job.id, org, JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap();
        repo.transition_status(job.id, org, JobStatus::Running, JobStatus::Completed, None)
            .await
            .unwrap();

        let err = repo
            .transition_status(job.id, org, JobStatus::Completed, JobStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MoldockError::StateTransition { .. }));
        assert_eq!(
            repo.get_job(job.id, org).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_event_sequences_are_monotonic() {
        let repo = InMemoryJobRepository::new();
        let org = Uuid::new_v4();
        let job = repo.create_job(new_job(org)).await.unwrap();

        for event_type in ["QUEUED", "DISPATCHED", "COMPLETED"] {
            repo.append_event(job.id, org, event_type, None).await.unwrap();
        }

        let events = repo.list_events(job.id, org).await.unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_list_jobs_pagination_is_stable() {
        let repo = InMemoryJobRepository::new();
        let org = Uuid::new_v4();
        for _ in 0..5 {
            repo.create_job(new_job(org)).await.unwrap();
        }

        let page1 = repo
            .list_jobs(org, JobFilters::default(), PageRequest { page: 1, per_page: 2 })
            .await
            .unwrap();
        let page2 = repo
            .list_jobs(org, JobFilters::default(), PageRequest { page: 2, per_page: 2 })
            .await
            .unwrap();

        assert_eq!(page1.total, 5);
        assert_eq!(page1.items.len(), 2);
        assert_eq!(page2.items.len(), 2);
        let ids1: Vec<Uuid> = page1.items.iter().map(|j| j.id).collect();
        let ids2: Vec<Uuid> = page2.items.iter().map(|j| j.id).collect();
        assert!(ids1.iter().all(|id| !ids2.contains(id)));
    }

    #[tokio::test]
    async fn test_count_active_ignores_terminal_jobs() {
        let repo = InMemoryJobRepository::new();
        let org = Uuid::new_v4();
        let a = repo.create_job(new_job(org)).await.unwrap();
        repo.create_job(new_job(org)).await.unwrap();

        repo.transition_status(a.id, org, JobStatus::Pending, JobStatus::Cancelled, None)
            .await
            .unwrap();
        assert_eq!(repo.count_active(org).await.unwrap(), 1);
    }
}
