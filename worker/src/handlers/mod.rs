//! Handler registry.
//!
//! Generalizes `WebhookWorker`'s dispatch-by-queue-name pattern from a
//! single webhook handler to a registry keyed by
//! [`queue_core::job::AuditJobPayload::kind`], mirroring `executor.py`'s
//! `EXECUTORS` dispatch dict.

pub mod full_audit;
pub mod hello_audit;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use queue_core::job::Job;
use sqlx::PgPool;

use crate::error::HandlerError;

/// Everything a handler needs, built once per claimed job.
pub struct HandlerContext {
    pub pool: PgPool,
    pub job: Job,
    pub fetcher: Arc<queue_core::fetch::SafeFetcher>,
    pub webhooks: Arc<queue_core::webhook::WebhookService>,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext) -> Result<(), HandlerError>;
}

pub fn build_registry() -> HashMap<&'static str, Arc<dyn JobHandler>> {
    let mut registry: HashMap<&'static str, Arc<dyn JobHandler>> = HashMap::new();
    registry.insert("full_audit", Arc::new(full_audit::FullAuditHandler));
    registry.insert("competitor_audit", Arc::new(full_audit::FullAuditHandler));
    registry.insert("hello_audit", Arc::new(hello_audit::HelloAuditHandler));
    registry
}
