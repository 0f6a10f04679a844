//! Worker pool and reaper behavior over the in-memory stack.

mod common;

use common::{dock_inputs, fast_config, harness, FakeBehavior, FakeEngine, TASK_NAME, TASK_VERSION};
use moldock_core::models::job_event::event_types;
use moldock_core::orchestration::{SubmitJobRequest, WorkerPool};
use moldock_core::repository::JobRepository;
use moldock_core::state_machine::JobStatus;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_pool_drives_jobs_to_completion() {
    let engine = FakeEngine::new("vina", FakeBehavior::Succeed { confidence: 0.95 });
    let h = harness(Arc::clone(&engine), fast_config());
    let org = h.organization.id;

    let pool = WorkerPool::start(
        Arc::clone(&h.dispatcher),
        Arc::clone(&h.queue) as _,
        Arc::clone(&h.cache) as _,
        h.config.clone(),
        2,
    );

    let mut job_ids = Vec::new();
    for i in 0..4 {
        let request = SubmitJobRequest::new(
            org,
            TASK_NAME,
            TASK_VERSION,
            dock_inputs(),
            serde_json::json!({"exhaustiveness": i + 1}),
        );
        job_ids.push(h.orchestrator.submit(request).await.unwrap().job_id);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut done = 0;
        for id in &job_ids {
            if h.repository.get_job(*id, org).await.unwrap().status == JobStatus::Completed {
                done += 1;
            }
        }
        if done == job_ids.len() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "jobs did not complete in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pool.shutdown().await;
    assert_eq!(engine.call_count(), 4);
}

#[tokio::test]
async fn test_reaper_spares_job_with_engine_call_in_flight() {
    let engine = FakeEngine::new("vina", FakeBehavior::BlockUntilCancelled);
    let h = harness(Arc::clone(&engine), fast_config());
    let org = h.organization.id;

    let request = SubmitJobRequest::new(
        org,
        TASK_NAME,
        TASK_VERSION,
        dock_inputs(),
        serde_json::json!({}),
    );
    let submitted = h.orchestrator.submit(request).await.unwrap();
    let job_id = submitted.job_id;

    let dispatcher = Arc::clone(&h.dispatcher);
    let dispatch = tokio::spawn(async move { dispatcher.dispatch(job_id, org).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if h.repository.get_job(job_id, org).await.unwrap().status == JobStatus::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Well past the staleness threshold while the engine call is still in
    // flight; the heartbeat must keep the job off the reaper's list.
    tokio::time::sleep(h.config.stale_running_threshold * 3).await;
    assert_eq!(h.dispatcher.reap_stale().await.unwrap(), 0);
    assert_eq!(
        h.repository.get_job(job_id, org).await.unwrap().status,
        JobStatus::Running
    );

    h.orchestrator.cancel(job_id, org).await.unwrap();
    dispatch.await.unwrap().unwrap();
    assert_eq!(
        h.repository.get_job(job_id, org).await.unwrap().status,
        JobStatus::Cancelled
    );
}

#[tokio::test]
async fn test_reaper_fails_stale_running_jobs() {
    let engine = FakeEngine::new("vina", FakeBehavior::Succeed { confidence: 0.95 });
    let h = harness(engine, fast_config());
    let org = h.organization.id;

    let request = SubmitJobRequest::new(
        org,
        TASK_NAME,
        TASK_VERSION,
        dock_inputs(),
        serde_json::json!({}),
    );
    let submitted = h.orchestrator.submit(request).await.unwrap();

    // Simulate a worker that claimed the job and then died: RUNNING with a
    // heartbeat that ages past the staleness threshold.
    h.repository
        .transition_status(
            submitted.job_id,
            org,
            JobStatus::Pending,
            JobStatus::Running,
            None,
        )
        .await
        .unwrap();
    tokio::time::sleep(h.config.stale_running_threshold + Duration::from_millis(20)).await;

    let reaped = h.dispatcher.reap_stale().await.unwrap();
    assert_eq!(reaped, 1);

    let job = h.repository.get_job(submitted.job_id, org).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("liveness"));

    let events = h.repository.list_events(submitted.job_id, org).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == event_types::REAPED));

    // A live job is left alone.
    assert_eq!(h.dispatcher.reap_stale().await.unwrap(), 0);
}
