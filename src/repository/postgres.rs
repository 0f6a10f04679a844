//! Postgres-backed job repository.
//!
//! All statements bind `organization_id` directly, so tenant scoping is
//! enforced at the query level rather than by caller-side filtering. Status
//! transitions are conditional updates (`WHERE status = expected`) giving
//! the same one-winner claim semantics as `SELECT ... FOR UPDATE` without
//! holding row locks across the engine call.
//!
//! Expected schema: `jobs`, `job_events` (unique on (job_id, sequence)),
//! `task_executions`, `task_results`.

use super::{JobFilters, JobRepository, Page, PageRequest};
use crate::error::{MoldockError, Result, ValidationViolation};
use crate::models::{
    CacheProvenance, Job, JobEvent, NewJob, NewTaskExecution, TaskExecution, TaskResult,
};
use crate::state_machine::{self, ExecutionStatus, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, organization_id, task_name, task_version, engine, status, inputs, \
                           params, input_signature, idempotency_key, cache_canonical_job_id, \
                           cache_confidence_score, attempts, failure_reason, heartbeat_at, \
                           created_at, updated_at";

fn job_from_row(row: &PgRow) -> std::result::Result<Job, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    let inputs: serde_json::Value = row.try_get("inputs")?;
    let inputs: BTreeMap<String, String> =
        serde_json::from_value(inputs).map_err(|e| sqlx::Error::Decode(e.into()))?;

    let cache_canonical_job_id: Option<Uuid> = row.try_get("cache_canonical_job_id")?;
    let cache_confidence_score: Option<f64> = row.try_get("cache_confidence_score")?;
    let cache_provenance = match (cache_canonical_job_id, cache_confidence_score) {
        (Some(canonical_job_id), Some(confidence_score)) => Some(CacheProvenance {
            canonical_job_id,
            confidence_score,
        }),
        _ => None,
    };

    Ok(Job {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        task_name: row.try_get("task_name")?,
        task_version: row.try_get("task_version")?,
        engine: row.try_get("engine")?,
        status,
        inputs,
        params: row.try_get("params")?,
        input_signature: row.try_get("input_signature")?,
        idempotency_key: row.try_get("idempotency_key")?,
        cache_provenance,
        attempts: row.try_get::<i32, _>("attempts")? as u32,
        failure_reason: row.try_get("failure_reason")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> std::result::Result<JobEvent, sqlx::Error> {
    Ok(JobEvent {
        job_id: row.try_get("job_id")?,
        organization_id: row.try_get("organization_id")?,
        sequence: row.try_get::<i64, _>("sequence")? as u64,
        event_type: row.try_get("event_type")?,
        detail: row.try_get("detail")?,
        created_at: row.try_get("created_at")?,
    })
}

fn execution_from_row(row: &PgRow) -> std::result::Result<TaskExecution, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(TaskExecution {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        organization_id: row.try_get("organization_id")?,
        task_name: row.try_get("task_name")?,
        task_version: row.try_get("task_version")?,
        engine: row.try_get("engine")?,
        attempt: row.try_get::<i32, _>("attempt")? as u32,
        status: status
            .parse::<ExecutionStatus>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_detail: row.try_get("error_detail")?,
    })
}

fn result_from_row(row: &PgRow) -> std::result::Result<TaskResult, sqlx::Error> {
    Ok(TaskResult {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        job_id: row.try_get("job_id")?,
        organization_id: row.try_get("organization_id")?,
        schema_version: row.try_get::<i32, _>("schema_version")? as u32,
        payload: row.try_get("payload")?,
        confidence_score: row.try_get("confidence_score")?,
        execution_time_ms: row.try_get::<i64, _>("execution_time_ms")? as u64,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create_job(&self, new_job: NewJob) -> Result<Job> {
        if new_job.organization_id.is_nil() {
            return Err(MoldockError::Validation(vec![ValidationViolation::new(
                "organization_id",
                "job must belong to an organization",
            )]));
        }

        if let Some(key) = &new_job.idempotency_key {
            if let Some(existing) = self
                .find_by_idempotency_key(new_job.organization_id, key)
                .await?
            {
                return Ok(existing);
            }
        }

        let inputs = serde_json::to_value(&new_job.inputs)?;
        let row = sqlx::query(&format!(
            "INSERT INTO jobs \
                 (id, organization_id, task_name, task_version, engine, status, inputs, params, \
                  input_signature, idempotency_key, attempts, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, NOW(), NOW()) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new_job.organization_id)
        .bind(&new_job.task_name)
        .bind(&new_job.task_version)
        .bind(&new_job.engine)
        .bind(JobStatus::Pending.to_string())
        .bind(inputs)
        .bind(&new_job.params)
        .bind(&new_job.input_signature)
        .bind(&new_job.idempotency_key)
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => Ok(job_from_row(&row)?),
            // A racing replay of the same idempotency key hits the unique
            // index; resolve to the job the winner created.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let key = new_job
                    .idempotency_key
                    .as_deref()
                    .ok_or_else(|| MoldockError::Database(sqlx::Error::Database(db_err)))?;
                self.find_by_idempotency_key(new_job.organization_id, key)
                    .await?
                    .ok_or_else(|| MoldockError::not_found("job"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_job(&self, job_id: Uuid, organization_id: Uuid) -> Result<Job> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND organization_id = $2"
        ))
        .bind(job_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(job_from_row(&row)?),
            None => Err(MoldockError::not_found("job")),
        }
    }

    async fn find_by_idempotency_key(
        &self,
        organization_id: Uuid,
        key: &str,
    ) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE organization_id = $1 AND idempotency_key = $2"
        ))
        .bind(organization_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    async fn list_jobs(
        &self,
        organization_id: Uuid,
        filters: JobFilters,
        page: PageRequest,
    ) -> Result<Page<Job>> {
        let mut conditions = vec!["organization_id = $1".to_string()];
        let mut next_bind = 2;
        if filters.status.is_some() {
            conditions.push(format!("status = ${next_bind}"));
            next_bind += 1;
        }
        if filters.task_name.is_some() {
            conditions.push(format!("task_name = ${next_bind}"));
            next_bind += 1;
        }
        if filters.engine.is_some() {
            conditions.push(format!("engine = ${next_bind}"));
            next_bind += 1;
        }
        let where_clause = conditions.join(" AND ");

        let count_sql = format!("SELECT COUNT(*) FROM jobs WHERE {where_clause}");
        let list_sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE {where_clause} \
             ORDER BY created_at DESC, id DESC LIMIT ${next_bind} OFFSET ${}",
            next_bind + 1
        );

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(organization_id);
        let mut list_query = sqlx::query(&list_sql).bind(organization_id);
        if let Some(status) = filters.status {
            count_query = count_query.bind(status.to_string());
            list_query = list_query.bind(status.to_string());
        }
        if let Some(task_name) = &filters.task_name {
            count_query = count_query.bind(task_name.clone());
            list_query = list_query.bind(task_name.clone());
        }
        if let Some(engine) = &filters.engine {
            count_query = count_query.bind(engine.clone());
            list_query = list_query.bind(engine.clone());
        }

        let total = count_query.fetch_one(&self.pool).await?;
        let rows = list_query
            .bind(i64::from(page.per_page))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(job_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            page: page.page.max(1),
            per_page: page.per_page,
            total: total as u64,
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

        let result = sqlx::query(
            "UPDATE jobs SET status = $1, \
                 failure_reason = COALESCE($2, failure_reason), \
                 heartbeat_at = CASE WHEN $1 = 'RUNNING' THEN NOW() ELSE heartbeat_at END, \
                 updated_at = NOW() \
             WHERE id = $3 AND organization_id = $4 AND status = $5",
        )
        .bind(to.to_string())
        .bind(failure_reason)
        .bind(job_id)
        .bind(organization_id)
        .bind(expected.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Distinguish a lost race from a missing/cross-tenant job.
        self.get_job(job_id, organization_id).await?;
        Ok(false)
    }

    async fn append_event(
        &self,
        job_id: Uuid,
        organization_id: Uuid,
        event_type: &str,
        detail: Option<serde_json::Value>,
    ) -> Result<JobEvent> {
        // The per-job sequence is assigned inside the insert; the unique
        // index on (job_id, sequence) turns a racing append into a retry.
        for _ in 0..3 {
            let row = sqlx::query(
                "INSERT INTO job_events (job_id, organization_id, sequence, event_type, detail, created_at) \
                 SELECT $1, $2, COALESCE(MAX(sequence), 0) + 1, $3, $4, NOW() \
                 FROM job_events WHERE job_id = $1 \
                 RETURNING job_id, organization_id, sequence, event_type, detail, created_at",
            )
            .bind(job_id)
            .bind(organization_id)
            .bind(event_type)
            .bind(&detail)
            .fetch_one(&self.pool)
            .await;

            match row {
                Ok(row) => return Ok(event_from_row(&row)?),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(MoldockError::Queue(
            "exhausted retries assigning event sequence".to_string(),
        ))
    }

    async fn list_events(&self, job_id: Uuid, organization_id: Uuid) -> Result<Vec<JobEvent>> {
        let rows = sqlx::query(
            "SELECT job_id, organization_id, sequence, event_type, detail, created_at \
             FROM job_events WHERE job_id = $1 AND organization_id = $2 \
             ORDER BY sequence ASC",
        )
        .bind(job_id)
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(event_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn increment_attempts(&self, job_id: Uuid, organization_id: Uuid) -> Result<u32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE jobs SET attempts = attempts + 1, updated_at = NOW() \
             WHERE id = $1 AND organization_id = $2 RETURNING attempts",
        )
        .bind(job_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        attempts
            .map(|a| a as u32)
            .ok_or_else(|| MoldockError::not_found("job"))
    }

    async fn update_heartbeat(&self, job_id: Uuid, organization_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET heartbeat_at = NOW() WHERE id = $1 AND organization_id = $2",
        )
        .bind(job_id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_active(&self, organization_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs \
             WHERE organization_id = $1 AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = 'RUNNING' AND (heartbeat_at IS NULL OR heartbeat_at < $1)"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(job_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn create_execution(&self, new_execution: NewTaskExecution) -> Result<TaskExecution> {
        let row = sqlx::query(
            "INSERT INTO task_executions \
                 (id, job_id, organization_id, task_name, task_version, engine, attempt, status, started_at) \
             SELECT $1, $2, $3, $4, $5, $6, $7, $8, NOW() \
             WHERE EXISTS (SELECT 1 FROM jobs WHERE id = $2 AND organization_id = $3) \
             RETURNING id, job_id, organization_id, task_name, task_version, engine, attempt, \
                       status, started_at, completed_at, error_detail",
        )
        .bind(Uuid::new_v4())
        .bind(new_execution.job_id)
        .bind(new_execution.organization_id)
        .bind(&new_execution.task_name)
        .bind(&new_execution.task_version)
        .bind(&new_execution.engine)
        .bind(new_execution.attempt as i32)
        .bind(ExecutionStatus::Running.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(execution_from_row(&row)?),
            None => Err(MoldockError::not_found("job")),
        }
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        organization_id: Uuid,
        status: ExecutionStatus,
        error_detail: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE task_executions SET status = $1, completed_at = NOW(), error_detail = $2 \
             WHERE id = $3 AND organization_id = $4",
        )
        .bind(status.to_string())
        .bind(error_detail)
        .bind(execution_id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MoldockError::not_found("task execution"));
        }
        Ok(())
    }

    async fn store_result(&self, result: TaskResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_results \
                 (id, execution_id, job_id, organization_id, schema_version, payload, \
                  confidence_score, execution_time_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(result.id)
        .bind(result.execution_id)
        .bind(result.job_id)
        .bind(result.organization_id)
        .bind(result.schema_version as i32)
        .bind(&result.payload)
        .bind(result.confidence_score)
        .bind(result.execution_time_ms as i64)
        .bind(result.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_result(&self, job_id: Uuid, organization_id: Uuid) -> Result<Option<TaskResult>> {
        let row = sqlx::query(
            "SELECT id, execution_id, job_id, organization_id, schema_version, payload, \
                    confidence_score, execution_time_ms, created_at \
             FROM task_results WHERE job_id = $1 AND organization_id = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(job_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(result_from_row).transpose()?)
    }
}
