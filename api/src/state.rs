use std::sync::Arc;

use health::HealthRegistry;
use queue_core::quota::QuotaService;
use queue_core::webhook::WebhookService;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub webhooks: Arc<WebhookService>,
    pub quotas: Arc<QuotaService>,
    pub health: HealthRegistry,
}

impl AppState {
    pub fn new(pool: PgPool, health: HealthRegistry) -> Self {
        Self {
            webhooks: Arc::new(WebhookService::new(pool.clone())),
            quotas: Arc::new(QuotaService::new(pool.clone())),
            pool,
            health,
        }
    }

    #[cfg(test)]
    pub fn for_test(pool: PgPool) -> Self {
        Self::new(pool, HealthRegistry::new("api-test"))
    }
}
