//! Management API entrypoint (§6.1).

mod handlers;
mod state;

use axum::Router;
use envconfig::Envconfig;
use queue_core::config::Settings;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use state::AppState;

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
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;

    sqlx::migrate!("../queue-core/migrations").run(&pool).await?;

    let health = health::HealthRegistry::new("api");
    let liveness = health
        .register("http_server".to_string(), time::Duration::seconds(30))
        .await;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            interval.tick().await;
            liveness.report_healthy().await;
        }
    });

    let state = AppState::new(pool, health);
    let app = handlers::app::add_routes(Router::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind).await?;
    tracing::info!("listening on {}", settings.bind);
    axum::serve(listener, app).await?;

    Ok(())
}
