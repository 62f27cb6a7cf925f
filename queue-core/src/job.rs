//! Job payloads, idempotency, and the durable job store (C6, C7, C8).
//!
//! Grounded on `apps/worker/executor.py`: `claim_job`'s atomic
//! `UPDATE ... RETURNING` over a subselect (one row claimed per call, no
//! `SELECT ... FOR UPDATE SKIP LOCKED` needed since the subselect already
//! picks a single candidate), `calculate_backoff`'s jittered exponential
//! retry delay, and `mark_job_failed`'s redaction of the stored error.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ClaimError, DatabaseError, EnqueueError};
use crate::quota::QuotaService;
use crate::redact::redact_str;

const BACKOFF_BASE_SECONDS: f64 = 30.0;
const BACKOFF_CAP_SECONDS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// The typed payloads a job can carry, tagged by `kind` in storage. New
/// audit types are added here and registered with a matching
/// `worker::handlers` entry; [`AuditJobPayload::kind`] is what the job
/// dispatch registry keys off of.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditJobPayload {
    FullAudit {
        url: String,
        tier: String,
        callback_url: Option<String>,
    },
    CompetitorAudit {
        url: String,
        competitor_urls: Vec<String>,
        tier: String,
        callback_url: Option<String>,
    },
    HelloAudit {
        url: String,
    },
}

impl AuditJobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditJobPayload::FullAudit { .. } => "full_audit",
            AuditJobPayload::CompetitorAudit { .. } => "competitor_audit",
            AuditJobPayload::HelloAudit { .. } => "hello_audit",
        }
    }

    fn canonical_key_material(&self) -> String {
        match self {
            AuditJobPayload::FullAudit { url, tier, .. } => format!("full_audit:{url}:{tier}"),
            AuditJobPayload::CompetitorAudit {
                url,
                competitor_urls,
                tier,
                ..
            } => {
                let mut competitors = competitor_urls.clone();
                competitors.sort();
                format!(
                    "competitor_audit:{url}:{}:{tier}",
                    competitors.join(",")
                )
            }
            AuditJobPayload::HelloAudit { url } => format!("hello_audit:{url}"),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: String,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub leased_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub idempotency_key: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn parsed_payload(&self) -> Result<AuditJobPayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// The `kind` tag of the stored payload, used by the worker's handler
    /// registry lookup without needing the full typed payload.
    pub fn payload_kind(&self) -> &str {
        self.payload
            .get("kind")
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }
}

/// Derive the idempotency key collapsing duplicate enqueues of the same
/// (tenant, job) down to a single queued row (§4.6 rule 1).
pub fn idempotency_key(tenant_id: &str, payload: &AuditJobPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b":");
    hasher.update(payload.canonical_key_material().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue `payload` for `tenant_id`, enforcing quota and collapsing a
    /// duplicate of an already-queued/running job onto the existing row
    /// (§4.6). `max_attempts` bounds the retry loop of C8's backoff.
    pub async fn enqueue(
        &self,
        quotas: &QuotaService,
        tenant_id: &str,
        payload: AuditJobPayload,
        max_attempts: i32,
    ) -> Result<Job, EnqueueError> {
        quotas
            .enforce_quota(tenant_id)
            .await
            .map_err(quota_error_to_enqueue_error)?;

        let key = idempotency_key(tenant_id, &payload);

        if let Some(existing) = sqlx::query_as::<_, Job>(
            "SELECT id, tenant_id, status, payload, attempts, max_attempts, leased_by, \
             lease_expires_at, available_at, last_error, idempotency_key, started_at, \
             finished_at, created_at \
             FROM jobs WHERE idempotency_key = $1 \
             AND status IN ('queued', 'running')",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?
        {
            return Ok(existing);
        }

        let payload_json = serde_json::to_value(&payload).expect("payload serializes");
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs
                (id, tenant_id, status, payload, attempts, max_attempts, available_at,
                 idempotency_key, created_at)
            VALUES ($1, $2, 'queued', $3, 0, $4, now(), $5, now())
            RETURNING id, tenant_id, status, payload, attempts, max_attempts, leased_by,
                      lease_expires_at, available_at, last_error, idempotency_key,
                      started_at, finished_at, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(tenant_id)
        .bind(&payload_json)
        .bind(max_attempts)
        .bind(&key)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;

        quotas
            .increment_usage(tenant_id)
            .await
            .map_err(|_| DatabaseError::Sqlx(sqlx::Error::RowNotFound))?;

        Ok(job)
    }

    /// Atomically claim a single queued (or lease-expired) job. Grounded
    /// directly on `claim_job`'s `UPDATE ... RETURNING` over a subselect:
    /// the subselect picks exactly one candidate row and the outer `UPDATE`
    /// is a single atomic statement, so two workers racing on the same row
    /// never both succeed — no `SELECT ... FOR UPDATE SKIP LOCKED` needed.
    pub async fn claim(
        &self,
        worker_id: &str,
        lease_seconds: i64,
    ) -> Result<Option<Job>, ClaimError> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'running',
                leased_by = $1,
                lease_expires_at = now() + make_interval(secs => $2),
                attempts = attempts + 1,
                started_at = COALESCE(started_at, now())
            WHERE id = (
                SELECT id FROM jobs
                WHERE available_at <= now()
                  AND (
                    status = 'queued'
                    OR (status = 'running' AND lease_expires_at < now())
                  )
                ORDER BY available_at ASC
                LIMIT 1
            )
            RETURNING id, tenant_id, status, payload, attempts, max_attempts, leased_by,
                      lease_expires_at, available_at, last_error, idempotency_key,
                      started_at, finished_at, created_at
            "#,
        )
        .bind(worker_id)
        .bind(lease_seconds as f64)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;

        Ok(job)
    }

    pub async fn renew_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease_seconds: i64,
    ) -> Result<(), ClaimError> {
        sqlx::query(
            "UPDATE jobs SET lease_expires_at = now() + make_interval(secs => $3) \
             WHERE id = $1 AND leased_by = $2",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(lease_seconds as f64)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;
        Ok(())
    }

    pub async fn mark_done(&self, job_id: Uuid) -> Result<(), ClaimError> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', leased_by = NULL, lease_expires_at = NULL, \
             finished_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;
        Ok(())
    }

    /// Requeue with jittered exponential backoff if attempts remain,
    /// otherwise terminally fail. The stored error is always redacted first
    /// (§7).
    pub async fn requeue_or_fail(
        &self,
        job: &Job,
        error: &str,
    ) -> Result<(), ClaimError> {
        let redacted = redact_str(error);

        if job.attempts >= job.max_attempts {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', leased_by = NULL, lease_expires_at = NULL, \
                 last_error = $2, finished_at = now() WHERE id = $1",
            )
            .bind(job.id)
            .bind(&redacted)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sqlx)?;
            return Ok(());
        }

        let delay = calculate_backoff(job.attempts);
        sqlx::query(
            "UPDATE jobs SET status = 'queued', leased_by = NULL, lease_expires_at = NULL, \
             last_error = $2, available_at = now() + make_interval(secs => $3) WHERE id = $1",
        )
        .bind(job.id)
        .bind(&redacted)
        .bind(delay)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;
        Ok(())
    }

    /// Fail a job immediately regardless of attempts remaining, used for
    /// errors a retry could never fix (e.g. SSRF-blocked target).
    pub async fn fail_permanently(&self, job: &Job, error: &str) -> Result<(), ClaimError> {
        let redacted = redact_str(error);
        sqlx::query(
            "UPDATE jobs SET status = 'failed', leased_by = NULL, lease_expires_at = NULL, \
             last_error = $2, finished_at = now() WHERE id = $1",
        )
        .bind(job.id)
        .bind(&redacted)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sqlx)?;
        Ok(())
    }
}

fn quota_error_to_enqueue_error(err: crate::quota::QuotaError) -> EnqueueError {
    match err {
        crate::quota::QuotaError::MonthlyAuditsExceeded { used, limit } => {
            EnqueueError::QuotaExceeded {
                kind: "monthly_audits".to_string(),
                limit,
                used,
            }
        }
        crate::quota::QuotaError::ConcurrentAuditsExceeded { used, limit } => {
            EnqueueError::QuotaExceeded {
                kind: "concurrent_audits".to_string(),
                limit,
                used,
            }
        }
        other => EnqueueError::Database(DatabaseError::Sqlx(sqlx::Error::Protocol(
            other.to_string(),
        ))),
    }
}

/// Exponential backoff with 0-10% jitter, capped. `attempts` is the number
/// of attempts already made (i.e. the value just written by [`JobStore::claim`]).
fn calculate_backoff(attempts: i32) -> f64 {
    let exponent = (attempts.max(1) - 1) as i32;
    let base_delay = BACKOFF_BASE_SECONDS * 2f64.powi(exponent);
    let capped = base_delay.min(BACKOFF_CAP_SECONDS);
    let jitter_fraction = rand::thread_rng().gen_range(0.0..0.10);
    capped * (1.0 + jitter_fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_stable_for_identical_payload() {
        let payload = AuditJobPayload::FullAudit {
            url: "https://example.com".to_string(),
            tier: "pro".to_string(),
            callback_url: None,
        };
        let a = idempotency_key("tenant-a", &payload);
        let b = idempotency_key("tenant-a", &payload);
        assert_eq!(a, b);
    }

    #[test]
    fn idempotency_key_differs_across_tenants() {
        let payload = AuditJobPayload::HelloAudit {
            url: "https://example.com".to_string(),
        };
        let a = idempotency_key("tenant-a", &payload);
        let b = idempotency_key("tenant-b", &payload);
        assert_ne!(a, b);
    }

    #[test]
    fn competitor_audit_key_ignores_competitor_url_order() {
        let a = AuditJobPayload::CompetitorAudit {
            url: "https://example.com".to_string(),
            competitor_urls: vec!["https://a.com".into(), "https://b.com".into()],
            tier: "basic".to_string(),
            callback_url: None,
        };
        let b = AuditJobPayload::CompetitorAudit {
            url: "https://example.com".to_string(),
            competitor_urls: vec!["https://b.com".into(), "https://a.com".into()],
            tier: "basic".to_string(),
            callback_url: None,
        };
        assert_eq!(idempotency_key("tenant-a", &a), idempotency_key("tenant-a", &b));
    }

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let first = calculate_backoff(1);
        let second = calculate_backoff(2);
        let tenth = calculate_backoff(10);
        assert!(first >= BACKOFF_BASE_SECONDS && first < BACKOFF_BASE_SECONDS * 1.10 + 1.0);
        assert!(second > first);
        assert!(tenth <= BACKOFF_CAP_SECONDS * 1.10 + 1.0);
    }
}
