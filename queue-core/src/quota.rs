//! Per-tenant quota enforcement (C5).
//!
//! Grounded on `quotas/service.py`'s `QuotaService`: tier-based monthly
//! limits (-1 = unlimited), a live-queried concurrent-job count rather than
//! a cached counter (so a crashed worker can't leave a tenant permanently
//! throttled), and a reset date aligned to the day-of-month the tenant's
//! billing cycle started on.

use chrono::{DateTime, Datelike, Months, Utc};
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct TierDefaults {
    pub monthly_audits: i64,
    pub max_concurrent_audits: i64,
    pub max_pages_per_audit: i64,
    pub max_ai_prompts_per_month: i64,
}

pub fn defaults_for_tier(tier: &str) -> TierDefaults {
    match tier {
        "pro" => TierDefaults {
            monthly_audits: 50,
            max_concurrent_audits: 5,
            max_pages_per_audit: 200,
            max_ai_prompts_per_month: 50,
        },
        "enterprise" => TierDefaults {
            monthly_audits: -1,
            max_concurrent_audits: 20,
            max_pages_per_audit: 1000,
            max_ai_prompts_per_month: 200,
        },
        _ => TierDefaults {
            monthly_audits: 10,
            max_concurrent_audits: 2,
            max_pages_per_audit: 50,
            max_ai_prompts_per_month: 10,
        },
    }
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("monthly audit quota exceeded: {used}/{limit}")]
    MonthlyAuditsExceeded { used: i64, limit: i64 },

    #[error("concurrent audit quota exceeded: {used}/{limit}")]
    ConcurrentAuditsExceeded { used: i64, limit: i64 },

    #[error("page limit exceeded for this audit: {requested}/{limit}")]
    PageLimitExceeded { requested: i64, limit: i64 },

    #[error("AI prompt quota exceeded: {used}/{limit}")]
    AiPromptsExceeded { used: i64, limit: i64 },
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TenantQuota {
    pub tenant_id: String,
    pub tier: String,
    pub monthly_audits_used: i64,
    pub ai_prompts_used: i64,
    pub reset_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct QuotaStatus {
    pub tier: String,
    pub monthly_audits_used: i64,
    pub monthly_audits_limit: i64,
    pub concurrent_audits_used: i64,
    pub concurrent_audits_limit: i64,
    pub reset_date: DateTime<Utc>,
    pub can_start: bool,
}

pub struct QuotaService {
    pool: PgPool,
}

impl QuotaService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_or_create_quota(&self, tenant_id: &str) -> Result<TenantQuota, QuotaError> {
        if let Some(existing) = sqlx::query_as::<_, TenantQuota>(
            "SELECT tenant_id, tier, monthly_audits_used, ai_prompts_used, reset_date \
             FROM tenant_quotas WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(existing);
        }

        let reset_date = calculate_reset_date(Utc::now());
        let row = sqlx::query_as::<_, TenantQuota>(
            r#"
            INSERT INTO tenant_quotas
                (tenant_id, tier, monthly_audits_used, ai_prompts_used, reset_date)
            VALUES ($1, 'basic', 0, 0, $2)
            ON CONFLICT (tenant_id) DO UPDATE SET tenant_id = EXCLUDED.tenant_id
            RETURNING tenant_id, tier, monthly_audits_used, ai_prompts_used, reset_date
            "#,
        )
        .bind(tenant_id)
        .bind(reset_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Live-queried count of jobs currently leased (not cached) so a worker
    /// crash never leaves a tenant's concurrent count stuck above zero.
    async fn concurrent_audit_count(&self, tenant_id: &str) -> Result<i64, QuotaError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE tenant_id = $1 AND status = 'running'",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Non-throwing status peek: current usage/limits and whether the
    /// tenant can start another audit right now. Never raises on a
    /// quota violation — callers that must enforce the limit should use
    /// [`Self::enforce_quota`] instead.
    pub async fn check_quota(&self, tenant_id: &str) -> Result<QuotaStatus, QuotaError> {
        let mut quota = self.get_or_create_quota(tenant_id).await?;
        if Utc::now() >= quota.reset_date {
            quota = self.reset_monthly_usage(tenant_id).await?;
        }

        let defaults = defaults_for_tier(&quota.tier);
        let concurrent_used = self.concurrent_audit_count(tenant_id).await?;

        let can_start = (defaults.monthly_audits < 0
            || quota.monthly_audits_used < defaults.monthly_audits)
            && concurrent_used < defaults.max_concurrent_audits;

        Ok(QuotaStatus {
            tier: quota.tier,
            monthly_audits_used: quota.monthly_audits_used,
            monthly_audits_limit: defaults.monthly_audits,
            concurrent_audits_used: concurrent_used,
            concurrent_audits_limit: defaults.max_concurrent_audits,
            reset_date: quota.reset_date,
            can_start,
        })
    }

    /// Throwing variant: calls [`Self::check_quota`] and raises the
    /// specific violation if the tenant cannot start another audit.
    pub async fn enforce_quota(&self, tenant_id: &str) -> Result<QuotaStatus, QuotaError> {
        let status = self.check_quota(tenant_id).await?;

        if status.monthly_audits_limit >= 0
            && status.monthly_audits_used >= status.monthly_audits_limit
        {
            return Err(QuotaError::MonthlyAuditsExceeded {
                used: status.monthly_audits_used,
                limit: status.monthly_audits_limit,
            });
        }
        if status.concurrent_audits_used >= status.concurrent_audits_limit {
            return Err(QuotaError::ConcurrentAuditsExceeded {
                used: status.concurrent_audits_used,
                limit: status.concurrent_audits_limit,
            });
        }

        Ok(status)
    }

    pub async fn increment_usage(&self, tenant_id: &str) -> Result<(), QuotaError> {
        sqlx::query(
            "UPDATE tenant_quotas SET monthly_audits_used = monthly_audits_used + 1 \
             WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn check_page_limit(&self, tier: &str, requested_pages: i64) -> Result<(), QuotaError> {
        let limit = defaults_for_tier(tier).max_pages_per_audit;
        if requested_pages > limit {
            return Err(QuotaError::PageLimitExceeded {
                requested: requested_pages,
                limit,
            });
        }
        Ok(())
    }

    pub async fn check_ai_prompt_limit(&self, tenant_id: &str) -> Result<(), QuotaError> {
        let quota = self.get_or_create_quota(tenant_id).await?;
        let limit = defaults_for_tier(&quota.tier).max_ai_prompts_per_month;
        if limit >= 0 && quota.ai_prompts_used >= limit {
            return Err(QuotaError::AiPromptsExceeded {
                used: quota.ai_prompts_used,
                limit,
            });
        }
        Ok(())
    }

    pub async fn reset_monthly_usage(&self, tenant_id: &str) -> Result<TenantQuota, QuotaError> {
        let next_reset = calculate_reset_date(Utc::now());
        let row = sqlx::query_as::<_, TenantQuota>(
            "UPDATE tenant_quotas SET monthly_audits_used = 0, ai_prompts_used = 0, \
             reset_date = $2 WHERE tenant_id = $1 \
             RETURNING tenant_id, tier, monthly_audits_used, ai_prompts_used, reset_date",
        )
        .bind(tenant_id)
        .bind(next_reset)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn update_tier(&self, tenant_id: &str, tier: &str) -> Result<(), QuotaError> {
        sqlx::query("UPDATE tenant_quotas SET tier = $2 WHERE tenant_id = $1")
            .bind(tenant_id)
            .bind(tier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Next billing-cycle boundary: the first occurrence, strictly after `now`,
/// of the day-of-month `now` started on (month-end clamped, mirroring the
/// original's loop that walks forward a month at a time).
fn calculate_reset_date(now: DateTime<Utc>) -> DateTime<Utc> {
    let day = now.day();
    let mut candidate = now;
    loop {
        candidate = candidate
            .checked_add_months(Months::new(1))
            .expect("date arithmetic does not overflow for realistic clocks");
        if candidate.day() == day.min(days_in_month(candidate)) {
            return candidate;
        }
    }
}

fn days_in_month(date: DateTime<Utc>) -> u32 {
    let (year, month) = (date.year(), date.month());
    let next_month = if month == 12 {
        chrono::NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        chrono::NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid calendar date");
    let this_month =
        chrono::NaiveDate::from_ymd_opt(year, month, 1).expect("valid calendar date");
    (next_month - this_month).num_days() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tier_concurrent_audit_limit() {
        assert_eq!(defaults_for_tier("basic").max_concurrent_audits, 2);
    }

    #[test]
    fn enterprise_tier_is_unlimited_on_monthly_audits() {
        assert_eq!(defaults_for_tier("enterprise").monthly_audits, -1);
    }

    #[test]
    fn reset_date_is_in_the_future() {
        let now = Utc::now();
        assert!(calculate_reset_date(now) > now);
    }

    #[test]
    fn reset_date_is_roughly_one_month_out() {
        let now = Utc::now();
        let reset = calculate_reset_date(now);
        let delta = reset - now;
        assert!(delta.num_days() >= 27 && delta.num_days() <= 31);
    }
}
