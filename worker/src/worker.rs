//! The job-polling worker runtime (C8, C9, §5.1).
//!
//! Grounded on `WebhookWorker::run` for the semaphore-gated spawn-per-job
//! shape, and on `apps/worker/main.py`'s `worker_loop` for the
//! claim→dispatch→classify sequence and lease-renewal side task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use health::HealthHandle;
use queue_core::job::JobStore;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::error::HandlerError;
use crate::handlers::{HandlerContext, JobHandler};

pub struct WorkerRuntime {
    worker_id: String,
    pool: PgPool,
    job_store: JobStore,
    registry: HashMap<&'static str, Arc<dyn JobHandler>>,
    fetcher: Arc<queue_core::fetch::SafeFetcher>,
    webhooks: Arc<queue_core::webhook::WebhookService>,
    poll_interval: Duration,
    lease_seconds: i64,
    max_concurrent_jobs: usize,
    liveness: HealthHandle,
}

impl WorkerRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: String,
        pool: PgPool,
        registry: HashMap<&'static str, Arc<dyn JobHandler>>,
        fetcher: Arc<queue_core::fetch::SafeFetcher>,
        webhooks: Arc<queue_core::webhook::WebhookService>,
        poll_interval: Duration,
        lease_seconds: i64,
        max_concurrent_jobs: usize,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            job_store: JobStore::new(pool.clone()),
            worker_id,
            pool,
            registry,
            fetcher,
            webhooks,
            poll_interval,
            lease_seconds,
            max_concurrent_jobs,
            liveness,
        }
    }

    /// Poll for claimable jobs until `shutdown` resolves, dispatching each
    /// claimed job to its own spawned task gated by the concurrency
    /// semaphore, exactly as `WebhookWorker::run` gates webhook jobs.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_concurrent_jobs));
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("worker {} shutting down", self.worker_id);
                        return;
                    }
                }
            }

            self.liveness.report_healthy().await;
            metrics::gauge!("worker_saturation_percent").set(
                1f64 - semaphore.available_permits() as f64 / self.max_concurrent_jobs as f64,
            );

            let job = match self.job_store.claim(&self.worker_id, self.lease_seconds).await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(err) => {
                    error!("error claiming job: {err}");
                    continue;
                }
            };
            metrics::counter!("jobs_claimed_total", "kind" => job.payload_kind().to_string())
                .increment(1);

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");

            let handler = self.registry.get(job.payload_kind()).cloned();
            let pool = self.pool.clone();
            let job_store = JobStore::new(self.pool.clone());
            let fetcher = self.fetcher.clone();
            let webhooks = self.webhooks.clone();
            let worker_id = self.worker_id.clone();
            let lease_seconds = self.lease_seconds;
            let job_id = job.id;

            tokio::spawn(async move {
                let _permit = permit;

                let Some(handler) = handler else {
                    warn!("no handler registered for job kind on job {job_id}");
                    let _ = job_store
                        .fail_permanently(&job, "no handler registered for job kind")
                        .await;
                    return;
                };

                let renew_worker_id = worker_id.clone();
                let renew_pool = pool.clone();
                let renew_handle = tokio::spawn(async move {
                    let store = JobStore::new(renew_pool);
                    let mut interval = tokio::time::interval(Duration::from_secs(
                        (lease_seconds / 2).max(1) as u64,
                    ));
                    loop {
                        interval.tick().await;
                        if store
                            .renew_lease(job_id, &renew_worker_id, lease_seconds)
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                });

                let ctx = HandlerContext {
                    pool,
                    job: job.clone(),
                    fetcher,
                    webhooks,
                };

                let result = handler.handle(ctx).await;
                renew_handle.abort();

                match result {
                    Ok(()) => {
                        metrics::counter!("jobs_completed_total").increment(1);
                        if let Err(err) = job_store.mark_done(job_id).await {
                            error!("failed to mark job {job_id} done: {err}");
                        }
                    }
                    Err(err) => {
                        metrics::counter!("jobs_failed_total").increment(1);
                        handle_failure(&job_store, &job, err).await;
                    }
                }
            });
        }
    }
}

async fn handle_failure(
    job_store: &JobStore,
    job: &queue_core::job::Job,
    err: HandlerError,
) {
    if err.is_permanent() {
        if let Err(store_err) = job_store.fail_permanently(job, err.message()).await {
            error!("failed to terminally fail job {}: {store_err}", job.id);
        }
        return;
    }

    if let Err(store_err) = job_store.requeue_or_fail(job, err.message()).await {
        error!("failed to requeue job {}: {store_err}", job.id);
    }
}
