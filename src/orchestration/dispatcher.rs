//! Dispatch: the asynchronous half of the job lifecycle.
//!
//! `dispatch` is safe under at-least-once queue delivery: the PENDING to
//! RUNNING claim is a compare-and-set, so a duplicate delivery or a second
//! worker observes a lost claim and returns without side effects. Whatever
//! happens inside an attempt, the job always reaches a terminal state; a
//! worker crash mid-execution is the one case left to the stale reaper.

use super::types::CancellationHub;
use crate::cache::{CacheStore, NewCacheEntry};
use crate::catalog::Catalog;
use crate::config::MoldockConfig;
use crate::engine::{EngineInput, EngineOutput, EnginePort, EngineRegistry};
use crate::error::{MoldockError, Result};
use crate::events::EventPublisher;
use crate::models::job_event::event_types;
use crate::models::{Job, NewTaskExecution, TaskResult, RESULT_SCHEMA_VERSION};
use crate::repository::JobRepository;
use crate::state_machine::{ExecutionStatus, JobStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct Dispatcher {
    repository: Arc<dyn JobRepository>,
    cache: Arc<dyn CacheStore>,
    catalog: Arc<dyn Catalog>,
    registry: Arc<EngineRegistry>,
    events: EventPublisher,
    cancellations: Arc<CancellationHub>,
    config: MoldockConfig,
}

impl Dispatcher {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        cache: Arc<dyn CacheStore>,
        catalog: Arc<dyn Catalog>,
        registry: Arc<EngineRegistry>,
        events: EventPublisher,
        cancellations: Arc<CancellationHub>,
        config: MoldockConfig,
    ) -> Self {
        Self {
            repository,
            cache,
            catalog,
            registry,
            events,
            cancellations,
            config,
        }
    }

    /// Claim and execute one job. Idempotent: re-delivery of an already
    /// claimed or terminal job is a no-op.
    pub async fn dispatch(&self, job_id: Uuid, organization_id: Uuid) -> Result<()> {
        let job = self.repository.get_job(job_id, organization_id).await?;
        if job.status != JobStatus::Pending {
            info!(job_id = %job_id, status = %job.status, "duplicate delivery, nothing to do");
            return Ok(());
        }

        let claimed = self
            .repository
            .transition_status(
                job_id,
                organization_id,
                JobStatus::Pending,
                JobStatus::Running,
                None,
            )
            .await?;
        if !claimed {
            info!(job_id = %job_id, "lost dispatch claim to another worker");
            return Ok(());
        }
        self.append(job_id, organization_id, event_types::DISPATCHED, None)
            .await?;

        match self.run_claimed(&job).await {
            Ok(()) => Ok(()),
            // The claim is ours, so any error that escapes the attempt loop
            // still terminalizes the job rather than leaving it RUNNING.
            Err(e) => {
                error!(job_id = %job_id, error = %e, "dispatch failed outside the attempt loop");
                self.finalize_failed(&job, format!("dispatch error: {e}"))
                    .await
            }
        }
    }

    async fn run_claimed(&self, job: &Job) -> Result<()> {
        let definition = self
            .catalog
            .get_task_definition(&job.task_name, &job.task_version, job.organization_id)
            .await?;
        let timeout = definition
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.engine_timeout);

        let input = EngineInput {
            job_id: job.id,
            organization_id: job.organization_id,
            inputs: job.inputs.clone(),
            params: job.params.as_object().cloned().unwrap_or_default(),
        };

        // Adapter-level validation is a caller error: terminal, no retries,
        // no execution record.
        let adapter = match self.registry.get_engine(&job.engine) {
            Ok(adapter) => adapter,
            Err(e) => return self.finalize_failed(job, e.to_string()).await,
        };
        let violations = adapter.validate_input(&input);
        if !violations.is_empty() {
            let reason = MoldockError::Validation(violations).to_string();
            return self.finalize_failed(job, reason).await;
        }

        let max_attempts = self.config.retry_limit + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;

            if self.cancellations.take(job.id) {
                return self.finalize_cancelled(job).await;
            }

            self.repository
                .increment_attempts(job.id, job.organization_id)
                .await?;
            let execution = self
                .repository
                .create_execution(NewTaskExecution {
                    job_id: job.id,
                    organization_id: job.organization_id,
                    task_name: job.task_name.clone(),
                    task_version: job.task_version.clone(),
                    engine: job.engine.clone(),
                    attempt,
                })
                .await?;
            self.append(
                job.id,
                job.organization_id,
                event_types::TASK_STARTED,
                Some(serde_json::json!({"attempt": attempt, "execution_id": execution.id})),
            )
            .await?;

            let outcome = match self.registry.resolve_healthy(&job.engine).await {
                Ok(adapter) => self.execute_with_heartbeat(job, &adapter, &input, timeout).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(output) => {
                    self.repository
                        .finish_execution(
                            execution.id,
                            job.organization_id,
                            ExecutionStatus::Completed,
                            None,
                        )
                        .await?;
                    self.append(
                        job.id,
                        job.organization_id,
                        event_types::TASK_COMPLETED,
                        Some(serde_json::json!({"attempt": attempt})),
                    )
                    .await?;
                    return self.finalize_completed(job, execution.id, output).await;
                }
                Err(e) => {
                    self.repository
                        .finish_execution(
                            execution.id,
                            job.organization_id,
                            ExecutionStatus::Failed,
                            Some(e.to_string()),
                        )
                        .await?;
                    self.append(
                        job.id,
                        job.organization_id,
                        event_types::TASK_FAILED,
                        Some(serde_json::json!({"attempt": attempt, "error": e.to_string()})),
                    )
                    .await?;

                    // An engine error caused by our own kill signal is a
                    // cancellation, not a failure.
                    if self.cancellations.take(job.id) {
                        return self.finalize_cancelled(job).await;
                    }

                    if e.is_retryable() && attempt < max_attempts {
                        let delay = self.config.backoff_delay(attempt);
                        warn!(
                            job_id = %job.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retryable engine failure, backing off"
                        );
                        self.append(
                            job.id,
                            job.organization_id,
                            event_types::RETRY_SCHEDULED,
                            Some(serde_json::json!({
                                "next_attempt": attempt + 1,
                                "delay_ms": delay.as_millis() as u64,
                            })),
                        )
                        .await?;
                        tokio::time::sleep(delay).await;
                        self.repository
                            .update_heartbeat(job.id, job.organization_id)
                            .await?;
                        continue;
                    }

                    let reason = if e.is_retryable() {
                        MoldockError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        }
                        .to_string()
                    } else {
                        e.to_string()
                    };
                    return self.finalize_failed(job, reason).await;
                }
            }
        }
    }

    /// Run the engine call while heartbeating the job, so a long invocation
    /// on a healthy worker never crosses the staleness threshold.
    async fn execute_with_heartbeat(
        &self,
        job: &Job,
        adapter: &Arc<dyn EnginePort>,
        input: &EngineInput,
        timeout: Duration,
    ) -> Result<EngineOutput> {
        let run = adapter.execute(input, timeout);
        tokio::pin!(run);

        let mut beat = tokio::time::interval(self.heartbeat_interval());
        beat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        beat.tick().await;

        loop {
            tokio::select! {
                outcome = &mut run => return outcome,
                _ = beat.tick() => {
                    if let Err(e) = self
                        .repository
                        .update_heartbeat(job.id, job.organization_id)
                        .await
                    {
                        warn!(job_id = %job.id, error = %e, "heartbeat update failed");
                    }
                }
            }
        }
    }

    fn heartbeat_interval(&self) -> Duration {
        // Several beats fit inside the staleness threshold, so a single
        // missed update cannot make a live job look stale.
        (self.config.stale_running_threshold / 4).max(Duration::from_millis(10))
    }

    async fn finalize_completed(
        &self,
        job: &Job,
        execution_id: Uuid,
        output: EngineOutput,
    ) -> Result<()> {
        let confidence = output.outcome.confidence_score();
        let result = TaskResult {
            id: Uuid::new_v4(),
            execution_id,
            job_id: job.id,
            organization_id: job.organization_id,
            schema_version: RESULT_SCHEMA_VERSION,
            payload: serde_json::to_value(&output.outcome)?,
            confidence_score: confidence,
            execution_time_ms: output.execution_time.as_millis() as u64,
            created_at: chrono::Utc::now(),
        };
        let result_id = result.id;
        self.repository.store_result(result).await?;

        self.cache
            .put(NewCacheEntry {
                task_name: job.task_name.clone(),
                task_version: job.task_version.clone(),
                input_signature: job.input_signature.clone(),
                canonical_job_id: job.id,
                result_id,
                confidence_score: confidence,
                ttl: self.config.cache_ttl,
            })
            .await?;

        // A cancel or reap may have terminalized the job while the engine
        // was finishing; the winning status stands and no completion event
        // is recorded for it.
        let won = self
            .repository
            .transition_status(
                job.id,
                job.organization_id,
                JobStatus::Running,
                JobStatus::Completed,
                None,
            )
            .await?;
        if !won {
            warn!(job_id = %job.id, "completion lost the terminal race; keeping winning status");
            return Ok(());
        }
        self.append(
            job.id,
            job.organization_id,
            event_types::COMPLETED,
            Some(serde_json::json!({"confidence_score": confidence})),
        )
        .await?;
        info!(job_id = %job.id, confidence, "job completed");
        Ok(())
    }

    async fn finalize_failed(&self, job: &Job, reason: String) -> Result<()> {
        let won = self
            .repository
            .transition_status(
                job.id,
                job.organization_id,
                JobStatus::Running,
                JobStatus::Failed,
                Some(reason.clone()),
            )
            .await?;
        if !won {
            warn!(job_id = %job.id, "failure lost the terminal race; keeping winning status");
            return Ok(());
        }
        self.append(
            job.id,
            job.organization_id,
            event_types::FAILED,
            Some(serde_json::json!({"reason": reason})),
        )
        .await?;
        warn!(job_id = %job.id, reason = %reason, "job failed");
        Ok(())
    }

    async fn finalize_cancelled(&self, job: &Job) -> Result<()> {
        let won = self
            .repository
            .transition_status(
                job.id,
                job.organization_id,
                JobStatus::Running,
                JobStatus::Cancelled,
                None,
            )
            .await?;
        if !won {
            warn!(job_id = %job.id, "cancellation lost the terminal race; keeping winning status");
            return Ok(());
        }
        self.append(job.id, job.organization_id, event_types::CANCELLED, None)
            .await?;
        info!(job_id = %job.id, "job cancelled during dispatch");
        Ok(())
    }

    /// Fail RUNNING jobs whose workers stopped heartbeating. Invoked
    /// periodically by the worker pool's reaper task.
    pub async fn reap_stale(&self) -> Result<u64> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.stale_running_threshold)
                .unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut reaped = 0;
        for job in self.repository.stale_running(cutoff).await? {
            let failed = self
                .repository
                .transition_status(
                    job.id,
                    job.organization_id,
                    JobStatus::Running,
                    JobStatus::Failed,
                    Some("worker liveness lost; reaped stale RUNNING job".to_string()),
                )
                .await?;
            if failed {
                self.append(
                    job.id,
                    job.organization_id,
                    event_types::REAPED,
                    Some(serde_json::json!({"heartbeat_at": job.heartbeat_at})),
                )
                .await?;
                self.append(
                    job.id,
                    job.organization_id,
                    event_types::FAILED,
                    Some(serde_json::json!({"reason": "worker liveness lost"})),
                )
                .await?;
                warn!(job_id = %job.id, "reaped stale RUNNING job");
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn append(
        &self,
        job_id: Uuid,
        organization_id: Uuid,
        event_type: &str,
        detail: Option<serde_json::Value>,
    ) -> Result<()> {
        let event = self
            .repository
            .append_event(job_id, organization_id, event_type, detail)
            .await?;
        self.events.publish(event);
        Ok(())
    }
}
