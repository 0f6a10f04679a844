//! Worker pool: polls the queue and drives dispatch.
//!
//! Each worker is an independent tokio task; mutual exclusion over a job
//! comes from the dispatcher's compare-and-set claim, not from coordination
//! between workers. A message is acked after dispatch returns, so a worker
//! death mid-job surfaces as a lease expiry and redelivery, which the
//! idempotent dispatch absorbs.

use super::dispatcher::Dispatcher;
use crate::cache::CacheStore;
use crate::config::MoldockConfig;
use crate::queue::JobQueue;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` polling loops plus one housekeeping task (stale-job
    /// reaper and cache TTL sweeper).
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        queue: Arc<dyn JobQueue>,
        cache: Arc<dyn CacheStore>,
        config: MoldockConfig,
        workers: usize,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::with_capacity(workers + 1);

        for worker_id in 0..workers {
            let dispatcher = Arc::clone(&dispatcher);
            let queue = Arc::clone(&queue);
            let config = config.clone();
            let mut stop = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                info!(worker_id, "worker started");
                loop {
                    if *stop.borrow() {
                        break;
                    }
                    match queue.receive(config.queue_lease).await {
                        Ok(Some(message)) => {
                            debug!(
                                worker_id,
                                job_id = %message.job_id,
                                delivery_count = message.delivery_count,
                                "leased job"
                            );
                            if let Err(e) = dispatcher
                                .dispatch(message.job_id, message.organization_id)
                                .await
                            {
                                error!(
                                    worker_id,
                                    job_id = %message.job_id,
                                    error = %e,
                                    "dispatch returned an error"
                                );
                            }
                            if let Err(e) = queue.ack(message.receipt).await {
                                error!(worker_id, error = %e, "ack failed");
                            }
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = tokio::time::sleep(config.worker_poll_interval) => {}
                                _ = stop.changed() => {}
                            }
                        }
                        Err(e) => {
                            error!(worker_id, error = %e, "queue receive failed");
                            tokio::time::sleep(config.worker_poll_interval).await;
                        }
                    }
                }
                info!(worker_id, "worker stopped");
            }));
        }

        {
            let dispatcher = Arc::clone(&dispatcher);
            let mut stop = shutdown.subscribe();
            let interval = config.worker_poll_interval.max(std::time::Duration::from_secs(1)) * 10;
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = stop.changed() => {}
                    }
                    if *stop.borrow() {
                        break;
                    }
                    if let Err(e) = dispatcher.reap_stale().await {
                        error!(error = %e, "stale job reaper failed");
                    }
                    match cache.invalidate_expired().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "swept expired cache entries"),
                        Err(e) => error!(error = %e, "cache sweep failed"),
                    }
                }
            }));
        }

        Self { shutdown, handles }
    }

    /// Signal all workers and wait for in-flight dispatches to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("worker pool shut down");
    }
}
