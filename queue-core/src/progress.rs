//! Progress reporting for long-running jobs (C10).
//!
//! Grounded on `handlers/full_audit.py`'s `write_progress_event`: a closed
//! set of stages with fixed percentages, inserted as they're reached so a
//! caller polling the job can show a progress bar without understanding
//! handler internals.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::redact::redact_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStage {
    Initializing,
    TechnicalAudit,
    ContentAudit,
    AiVisibilityAudit,
    GeneratingReport,
    Completed,
    Failed,
}

impl ProgressStage {
    pub fn percent(&self) -> u8 {
        match self {
            ProgressStage::Initializing => 0,
            ProgressStage::TechnicalAudit => 10,
            ProgressStage::ContentAudit => 30,
            ProgressStage::AiVisibilityAudit => 50,
            ProgressStage::GeneratingReport => 80,
            ProgressStage::Completed => 100,
            ProgressStage::Failed => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Initializing => "initializing",
            ProgressStage::TechnicalAudit => "technical_audit",
            ProgressStage::ContentAudit => "content_audit",
            ProgressStage::AiVisibilityAudit => "ai_visibility_audit",
            ProgressStage::GeneratingReport => "generating_report",
            ProgressStage::Completed => "completed",
            ProgressStage::Failed => "failed",
        }
    }
}

/// Insert a progress event for `job_id`. `message` is redacted before
/// storage since handlers sometimes pass through upstream error text.
pub async fn write_progress_event(
    pool: &PgPool,
    job_id: Uuid,
    stage: ProgressStage,
    message: Option<&str>,
) -> Result<(), DatabaseError> {
    let redacted_message = message.map(redact_str);
    sqlx::query(
        "INSERT INTO progress_events (id, job_id, stage, percent, message, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::now_v7())
    .bind(job_id)
    .bind(stage.as_str())
    .bind(stage.percent() as i32)
    .bind(redacted_message)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(DatabaseError::Sqlx)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_percentages_match_spec_ladder() {
        assert_eq!(ProgressStage::Initializing.percent(), 0);
        assert_eq!(ProgressStage::TechnicalAudit.percent(), 10);
        assert_eq!(ProgressStage::ContentAudit.percent(), 30);
        assert_eq!(ProgressStage::AiVisibilityAudit.percent(), 50);
        assert_eq!(ProgressStage::GeneratingReport.percent(), 80);
        assert_eq!(ProgressStage::Completed.percent(), 100);
    }
}
