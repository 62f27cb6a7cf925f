//! Worker process entrypoint (§5.1).
//!
//! Grounded on `apps/worker/main.py`'s `main()`: two concurrent loops (job
//! polling and webhook-retry processing) under a shared shutdown signal,
//! started together and joined on exit.

mod error;
mod handlers;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use queue_core::config::Settings;
use queue_core::fetch::SafeFetcher;
use queue_core::webhook::WebhookService;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .expect("failed to install Prometheus metrics recorder");

    let settings = Settings::init_from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await?;

    sqlx::migrate!("../queue-core/migrations").run(&pool).await?;

    let registry = health::HealthRegistry::new("worker");
    let liveness = registry
        .register(
            "job_poll_loop".to_string(),
            time::Duration::seconds(settings.worker_poll_interval_seconds as i64 * 4),
        )
        .await;

    let fetcher = Arc::new(SafeFetcher::new()?);
    let webhooks = Arc::new(WebhookService::new(pool.clone()));
    let worker_id = format!("worker-{}", std::process::id());

    let runtime = worker::WorkerRuntime::new(
        worker_id,
        pool.clone(),
        handlers::build_registry(),
        fetcher,
        webhooks.clone(),
        Duration::from_secs(settings.worker_poll_interval_seconds),
        settings.worker_lease_seconds,
        settings.worker_max_concurrent_jobs,
        liveness,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let poll_handle = tokio::spawn(async move { runtime.run(shutdown_rx).await });

    let retry_interval = Duration::from_secs(settings.webhook_retry_interval_seconds);
    let mut retry_shutdown_rx = shutdown_tx.subscribe();
    let retry_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(retry_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = webhooks.process_pending_retries().await {
                        error!("error processing webhook retries: {err}");
                    }
                }
                _ = retry_shutdown_rx.changed() => {
                    if *retry_shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in-flight jobs");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(poll_handle, retry_handle);

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
