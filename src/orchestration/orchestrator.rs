//! Submission and lifecycle use-cases.

use super::types::{
    CacheOutcome, CancellationHub, JobStatusView, SubmissionResult, SubmitJobRequest,
};
use crate::cache::{CacheDecision, CacheStore, ReusePolicy};
use crate::canonical;
use crate::catalog::Catalog;
use crate::config::MoldockConfig;
use crate::engine::EngineRegistry;
use crate::error::{MoldockError, Result, ValidationViolation};
use crate::events::EventPublisher;
use crate::models::job_event::event_types;
use crate::models::{CacheProvenance, Job, NewJob};
use crate::queue::JobQueue;
use crate::repository::{JobFilters, JobRepository, Page, PageRequest};
use crate::state_machine::JobStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Front door of the core. Owns the synchronous lifecycle operations; engine
/// execution happens only in the worker pool, never inline here.
///
/// Constructed once at startup with the process-wide engine registry passed
/// in explicitly, so tests assemble an orchestrator from fakes without any
/// ambient state.
pub struct Orchestrator {
    repository: Arc<dyn JobRepository>,
    cache: Arc<dyn CacheStore>,
    queue: Arc<dyn JobQueue>,
    catalog: Arc<dyn Catalog>,
    registry: Arc<EngineRegistry>,
    events: EventPublisher,
    cancellations: Arc<CancellationHub>,
    config: MoldockConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn JobRepository>,
        cache: Arc<dyn CacheStore>,
        queue: Arc<dyn JobQueue>,
        catalog: Arc<dyn Catalog>,
        registry: Arc<EngineRegistry>,
        events: EventPublisher,
        cancellations: Arc<CancellationHub>,
        config: MoldockConfig,
    ) -> Self {
        Self {
            repository,
            cache,
            queue,
            catalog,
            registry,
            events,
            cancellations,
            config,
        }
    }

    /// Submit one docking job.
    ///
    /// Boundary rejections (validation, unknown engine, quota, suspended
    /// tenant) return before anything is persisted. An actionable cache hit
    /// answers with the canonical job and creates nothing. Otherwise a
    /// PENDING job is created, a `QUEUED` event appended, and the job
    /// enqueued for the worker pool.
    pub async fn submit(&self, request: SubmitJobRequest) -> Result<SubmissionResult> {
        let organization = self
            .catalog
            .get_organization(request.organization_id)
            .await?;
        if !organization.status.can_submit() {
            return Err(MoldockError::Validation(vec![ValidationViolation::new(
                "organization",
                format!("organization is {} and cannot submit", organization.status),
            )]));
        }

        let definition = self
            .catalog
            .get_task_definition(
                &request.task_name,
                &request.task_version,
                request.organization_id,
            )
            .await?;

        let engine_name = request
            .engine
            .clone()
            .unwrap_or_else(|| definition.engine.clone());
        // Fail fast on engines that can never dispatch.
        self.registry.get_engine(&engine_name)?;

        let (normalized_params, signature) = canonical::canonicalize(
            &definition.name,
            &definition.version,
            &definition.parameter_schema,
            &definition.required_inputs,
            &request.inputs,
            &request.params,
        )?;

        // Replay of a client retry maps back to the already-created job.
        if let Some(key) = &request.idempotency_key {
            if let Some(job) = self
                .repository
                .find_by_idempotency_key(request.organization_id, key)
                .await?
            {
                return Ok(SubmissionResult {
                    job_id: job.id,
                    status: job.status,
                    cache: CacheOutcome::miss(),
                });
            }
        }

        let mut rejected_entry: Option<CacheProvenance> = None;
        if request.use_cache {
            let entry = self
                .cache
                .lookup(&definition.name, &definition.version, &signature)
                .await?;
            let threshold = definition
                .cache_confidence_threshold
                .unwrap_or(self.config.cache_confidence_threshold);
            match ReusePolicy::new(threshold).decide(entry, chrono::Utc::now()) {
                CacheDecision::Hit(entry) => {
                    self.cache.record_hit(entry.id).await?;
                    info!(
                        task = %definition.name,
                        signature = %signature,
                        confidence = entry.confidence_score,
                        "cache hit, reusing canonical result"
                    );
                    return Ok(SubmissionResult {
                        job_id: entry.canonical_job_id,
                        status: JobStatus::Completed,
                        cache: CacheOutcome {
                            hit: true,
                            canonical_job_id: Some(entry.canonical_job_id),
                            confidence_score: Some(entry.confidence_score),
                            rejected: None,
                        },
                    });
                }
                CacheDecision::BelowThreshold(entry) | CacheDecision::Expired(entry) => {
                    rejected_entry = Some(CacheProvenance {
                        canonical_job_id: entry.canonical_job_id,
                        confidence_score: entry.confidence_score,
                    });
                }
                CacheDecision::Miss => {}
            }
        }

        let active = self.repository.count_active(request.organization_id).await?;
        // A misprovisioned negative quota must read as zero, not wrap to a
        // huge unsigned limit.
        let limit = organization.quotas.max_concurrent_jobs.max(0) as u64;
        if active >= limit {
            return Err(MoldockError::QuotaExceeded {
                organization_id: request.organization_id,
                detail: format!("{active} active jobs at limit {limit}"),
            });
        }

        let job = self
            .repository
            .create_job(NewJob {
                organization_id: request.organization_id,
                task_name: definition.name.clone(),
                task_version: definition.version.clone(),
                engine: engine_name,
                inputs: request.inputs,
                params: serde_json::Value::Object(normalized_params),
                input_signature: signature,
                idempotency_key: request.idempotency_key,
            })
            .await?;

        // create_job resolves idempotency-key races to the winner's job; a
        // replayed job is already queued, so only a fresh PENDING one with
        // no history gets the QUEUED event and enqueue.
        if job.status == JobStatus::Pending && job.attempts == 0 {
            let events = self.repository.list_events(job.id, job.organization_id).await?;
            if events.is_empty() {
                let event = self
                    .repository
                    .append_event(job.id, job.organization_id, event_types::QUEUED, None)
                    .await?;
                self.events.publish(event);
                self.queue
                    .enqueue(job.id, job.organization_id, None)
                    .await?;
                info!(job_id = %job.id, task = %job.task_name, "job queued");
            }
        }

        Ok(SubmissionResult {
            job_id: job.id,
            status: job.status,
            cache: CacheOutcome {
                hit: false,
                canonical_job_id: None,
                confidence_score: None,
                rejected: rejected_entry,
            },
        })
    }

    /// Cancel a job.
    ///
    /// PENDING jobs become CANCELLED immediately and are skipped at dispatch.
    /// RUNNING jobs have their engine invocation signalled for teardown; if
    /// teardown does not confirm within the configured grace period the job
    /// is forced to FAILED so it cannot stay RUNNING forever. Cancelling a
    /// terminal job is a no-op returning its current state.
    pub async fn cancel(&self, job_id: Uuid, organization_id: Uuid) -> Result<Job> {
        let job = self.repository.get_job(job_id, organization_id).await?;

        match job.status {
            JobStatus::Pending => {
                let won = self
                    .repository
                    .transition_status(
                        job_id,
                        organization_id,
                        JobStatus::Pending,
                        JobStatus::Cancelled,
                        None,
                    )
                    .await?;
                if won {
                    let event = self
                        .repository
                        .append_event(job_id, organization_id, event_types::CANCELLED, None)
                        .await?;
                    self.events.publish(event);
                    info!(job_id = %job_id, "pending job cancelled before dispatch");
                    return self.repository.get_job(job_id, organization_id).await;
                }
                // A worker claimed it first; fall through to the running path.
                self.cancel_running(job_id, organization_id).await
            }
            JobStatus::Running => self.cancel_running(job_id, organization_id).await,
            _ => Ok(job),
        }
    }

    async fn cancel_running(&self, job_id: Uuid, organization_id: Uuid) -> Result<Job> {
        self.cancellations.request(job_id);
        let event = self
            .repository
            .append_event(job_id, organization_id, event_types::CANCEL_REQUESTED, None)
            .await?;
        self.events.publish(event);

        let job = self.repository.get_job(job_id, organization_id).await?;
        if let Ok(adapter) = self.registry.get_engine(&job.engine) {
            if let Err(e) = adapter.cancel(job_id).await {
                warn!(job_id = %job_id, error = %e, "engine cancel signal failed");
            }
        }

        // Wait for the dispatcher to confirm teardown, then escalate.
        let deadline = tokio::time::Instant::now() + self.config.cancellation_grace;
        loop {
            let job = self.repository.get_job(job_id, organization_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let forced = self
            .repository
            .transition_status(
                job_id,
                organization_id,
                JobStatus::Running,
                JobStatus::Failed,
                Some("cancellation timed out; forced failure".to_string()),
            )
            .await?;
        if forced {
            warn!(job_id = %job_id, "cancellation grace elapsed, forcing FAILED");
            let event = self
                .repository
                .append_event(
                    job_id,
                    organization_id,
                    event_types::FAILED,
                    Some(serde_json::json!({"reason": "cancellation timed out"})),
                )
                .await?;
            self.events.publish(event);
        }
        self.repository.get_job(job_id, organization_id).await
    }

    /// Job, ordered event history, and result (when completed) in one view.
    pub async fn status(&self, job_id: Uuid, organization_id: Uuid) -> Result<JobStatusView> {
        let job = self.repository.get_job(job_id, organization_id).await?;
        let events = self.repository.list_events(job_id, organization_id).await?;
        let result = self.repository.get_result(job_id, organization_id).await?;
        Ok(JobStatusView {
            job,
            events,
            result,
        })
    }

    pub async fn list_jobs(
        &self,
        organization_id: Uuid,
        filters: JobFilters,
        page: PageRequest,
    ) -> Result<Page<Job>> {
        self.repository.list_jobs(organization_id, filters, page).await
    }

    /// Subscribe to the live lifecycle event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::events::PublishedEvent> {
        self.events.subscribe()
    }
}
