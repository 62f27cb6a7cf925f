//! Full-site and competitor audit handler (C11 exemplar).
//!
//! Grounded on `handlers/full_audit.py`'s `handle_full_audit`: walk a fixed
//! sequence of progress stages, fire a webhook to every subscription
//! matching the event on completion or failure, and let any fetch failure
//! propagate as the classified [`HandlerError`] it already is.
//!
//! The real implementation runs a technical crawl, a content audit, and an
//! AI-visibility check between `TechnicalAudit` and `GeneratingReport`; this
//! exemplar performs a single safe fetch of the target URL as a stand-in
//! for that pipeline, since the analysis passes themselves are outside this
//! system's scope (they're product logic, not job-substrate logic).

use async_trait::async_trait;
use queue_core::job::AuditJobPayload;
use queue_core::progress::{write_progress_event, ProgressStage};
use queue_core::webhook::WebhookEvent;

use crate::error::HandlerError;
use crate::handlers::{HandlerContext, JobHandler};

pub struct FullAuditHandler;

#[async_trait]
impl JobHandler for FullAuditHandler {
    async fn handle(&self, ctx: HandlerContext) -> Result<(), HandlerError> {
        let payload = ctx
            .job
            .parsed_payload()
            .map_err(|e| HandlerError::Unclassified(e.to_string()))?;

        let (url, tenant_id) = match &payload {
            AuditJobPayload::FullAudit { url, .. } => (url.clone(), ctx.job.tenant_id.clone()),
            AuditJobPayload::CompetitorAudit { url, .. } => (url.clone(), ctx.job.tenant_id.clone()),
            AuditJobPayload::HelloAudit { .. } => {
                return Err(HandlerError::Unclassified(
                    "full audit handler received a hello_audit payload".to_string(),
                ))
            }
        };

        write_progress_event(&ctx.pool, ctx.job.id, ProgressStage::Initializing, None)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        write_progress_event(&ctx.pool, ctx.job.id, ProgressStage::TechnicalAudit, None)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        let fetch_opts = queue_core::fetch::FetchOptions::default();
        let fetch_result = ctx.fetcher.fetch(&url, &fetch_opts).await;

        let fetch_result = match fetch_result {
            Ok(result) => result,
            Err(err) => {
                write_progress_event(
                    &ctx.pool,
                    ctx.job.id,
                    ProgressStage::Failed,
                    Some(&err.to_string()),
                )
                .await
                .ok();
                self.fire_failure_webhook(&ctx, &tenant_id, &err.to_string())
                    .await;
                return Err(err.into());
            }
        };

        write_progress_event(&ctx.pool, ctx.job.id, ProgressStage::ContentAudit, None)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        write_progress_event(
            &ctx.pool,
            ctx.job.id,
            ProgressStage::AiVisibilityAudit,
            None,
        )
        .await
        .map_err(|e| HandlerError::Transient(e.to_string()))?;

        write_progress_event(&ctx.pool, ctx.job.id, ProgressStage::GeneratingReport, None)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        write_progress_event(&ctx.pool, ctx.job.id, ProgressStage::Completed, None)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        let report = serde_json::json!({
            "url": url,
            "status_code": fetch_result.status,
            "final_url": fetch_result.final_url,
        });
        self.fire_success_webhook(&ctx, &tenant_id, report).await;

        Ok(())
    }
}

impl FullAuditHandler {
    /// Fans out to every active subscription matching the event for this
    /// tenant, per [`queue_core::webhook::WebhookService::fire_event`]'s own
    /// contract — not conditioned on anything job-level.
    async fn fire_success_webhook(
        &self,
        ctx: &HandlerContext,
        tenant_id: &str,
        report: serde_json::Value,
    ) {
        let _ = ctx
            .webhooks
            .fire_event(tenant_id, WebhookEvent::AuditCompleted, report)
            .await;
    }

    async fn fire_failure_webhook(&self, ctx: &HandlerContext, tenant_id: &str, error: &str) {
        let body = serde_json::json!({"error": error});
        let _ = ctx
            .webhooks
            .fire_event(tenant_id, WebhookEvent::AuditFailed, body)
            .await;
    }
}
