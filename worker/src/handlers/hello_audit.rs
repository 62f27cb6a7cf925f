//! Minimal exemplar handler (C11): fetch a URL, extract the title, hash the
//! body. Grounded on `handlers/hello_audit.py`'s `handle_hello_audit`, kept
//! deliberately small as the reference implementation new handlers are
//! written against.

use async_trait::async_trait;
use queue_core::job::AuditJobPayload;
use queue_core::progress::{write_progress_event, ProgressStage};
use sha2::{Digest, Sha256};

use crate::error::HandlerError;
use crate::handlers::{HandlerContext, JobHandler};

pub struct HelloAuditHandler;

#[async_trait]
impl JobHandler for HelloAuditHandler {
    async fn handle(&self, ctx: HandlerContext) -> Result<(), HandlerError> {
        let payload = ctx
            .job
            .parsed_payload()
            .map_err(|e| HandlerError::Unclassified(e.to_string()))?;

        let AuditJobPayload::HelloAudit { url } = payload else {
            return Err(HandlerError::Unclassified(
                "hello audit handler received a non-hello_audit payload".to_string(),
            ));
        };

        write_progress_event(&ctx.pool, ctx.job.id, ProgressStage::Initializing, None)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        let fetch_opts = queue_core::fetch::FetchOptions::default();
        let result = ctx.fetcher.fetch(&url, &fetch_opts).await?;

        let body_text = String::from_utf8_lossy(&result.body);
        let title = extract_title(&body_text).unwrap_or_else(|| "(no title)".to_string());
        let hash = hex::encode(Sha256::digest(&result.body));

        write_progress_event(
            &ctx.pool,
            ctx.job.id,
            ProgressStage::Completed,
            Some(&format!("title={title} sha256={hash}")),
        )
        .await
        .map_err(|e| HandlerError::Transient(e.to_string()))?;

        Ok(())
    }
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = lower[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    Some(html[open_end..close].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_title() {
        let html = "<html><head><title>Example Domain</title></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Example Domain"));
    }

    #[test]
    fn returns_none_without_a_title_tag() {
        assert_eq!(extract_title("<html><body>hi</body></html>"), None);
    }
}
