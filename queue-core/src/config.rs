//! Environment-driven configuration shared by the `worker` and `api` binaries.
//!
//! Every value has a default so the core runs with zero required
//! configuration beyond a database connection string.

use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct Settings {
    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "WORKER_POLL_INTERVAL", default = "5")]
    pub worker_poll_interval_seconds: u64,

    #[envconfig(from = "WORKER_LEASE_SECONDS", default = "300")]
    pub worker_lease_seconds: i64,

    #[envconfig(from = "WEBHOOK_RETRY_INTERVAL", default = "60")]
    pub webhook_retry_interval_seconds: u64,

    #[envconfig(from = "WORKER_MAX_CONCURRENT_JOBS", default = "10")]
    pub worker_max_concurrent_jobs: usize,

    #[envconfig(from = "WORKER_DEQUEUE_BATCH_SIZE", default = "1")]
    pub worker_dequeue_batch_size: u32,

    #[envconfig(from = "BIND", default = "0.0.0.0:3000")]
    pub bind: String,
}
