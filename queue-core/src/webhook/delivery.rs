//! Webhook subscription management and delivery (C4).
//!
//! Grounded on `webhooks/service.py`'s `WebhookService`: create/list/delete
//! subscriptions, fire an event to every matching subscription, attempt
//! delivery with a signed envelope, classify the response, and schedule a
//! retry on the same fixed ladder the original uses.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::redact::redact_json;
use crate::webhook::security::{sign_payload, validate_webhook_url};

/// Fixed backoff ladder for webhook delivery retries, in seconds.
pub const RETRY_DELAYS_SECONDS: [i64; 5] = [60, 300, 900, 3600, 14400];
pub const MAX_RETRIES: i32 = 5;
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WebhookEvent {
    AuditCompleted,
    AuditFailed,
    QuotaWarning,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::AuditCompleted => "audit.completed",
            WebhookEvent::AuditFailed => "audit.failed",
            WebhookEvent::QuotaWarning => "quota.warning",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub tenant_id: String,
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event: String,
    pub payload: Value,
    pub status: String,
    pub attempt: i32,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct WebhookService {
    pool: PgPool,
    client: reqwest::Client,
}

impl WebhookService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            client: reqwest::Client::new(),
        }
    }

    pub async fn create_webhook(
        &self,
        tenant_id: &str,
        url: &str,
        events: &[String],
    ) -> Result<WebhookSubscription, DatabaseError> {
        validate_webhook_url(url).map_err(|e| {
            DatabaseError::Sqlx(sqlx::Error::Protocol(format!("invalid webhook url: {e}")))
        })?;
        let secret = super::security::generate_secret();

        let row = sqlx::query_as::<_, WebhookSubscription>(
            r#"
            INSERT INTO webhooks (id, tenant_id, url, secret, events, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, true, now())
            RETURNING id, tenant_id, url, secret, events, is_active, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(tenant_id)
        .bind(url)
        .bind(&secret)
        .bind(events)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_webhooks(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<WebhookSubscription>, DatabaseError> {
        let rows = sqlx::query_as::<_, WebhookSubscription>(
            "SELECT id, tenant_id, url, secret, events, is_active, created_at \
             FROM webhooks WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete_webhook(&self, tenant_id: &str, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM webhooks WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_deliveries(
        &self,
        webhook_id: Uuid,
    ) -> Result<Vec<WebhookDelivery>, DatabaseError> {
        let rows = sqlx::query_as::<_, WebhookDelivery>(
            "SELECT id, webhook_id, event, payload, status, attempt, response_status, \
             response_body, error_message, next_retry_at, delivered_at, created_at \
             FROM webhook_deliveries WHERE webhook_id = $1 ORDER BY created_at DESC",
        )
        .bind(webhook_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Fire `event` with `payload` to every active subscription on
    /// `tenant_id` that lists it, attempting delivery inline for each.
    pub async fn fire_event(
        &self,
        tenant_id: &str,
        event: WebhookEvent,
        payload: Value,
    ) -> Result<(), DatabaseError> {
        let subscriptions = sqlx::query_as::<_, WebhookSubscription>(
            "SELECT id, tenant_id, url, secret, events, is_active, created_at \
             FROM webhooks WHERE tenant_id = $1 AND is_active = true",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        for subscription in subscriptions {
            if !subscription.events.iter().any(|e| e == event.as_str()) {
                continue;
            }
            self.create_and_deliver(&subscription, event, payload.clone())
                .await?;
        }

        Ok(())
    }

    async fn create_and_deliver(
        &self,
        subscription: &WebhookSubscription,
        event: WebhookEvent,
        payload: Value,
    ) -> Result<(), DatabaseError> {
        let delivery_id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries
                (id, webhook_id, event, payload, status, attempt, created_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, now())
            "#,
        )
        .bind(delivery_id)
        .bind(subscription.id)
        .bind(event.as_str())
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        self.deliver(subscription, delivery_id, event, &payload, 0)
            .await
    }

    /// Build the signed envelope, POST it, and classify the outcome.
    /// 2xx ⇒ delivered. 4xx other than 429 ⇒ permanently failed (no retry).
    /// 429, 5xx, timeout, or network error ⇒ scheduled for retry up to
    /// [`MAX_RETRIES`].
    async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        delivery_id: Uuid,
        event: WebhookEvent,
        payload: &Value,
        attempt: i32,
    ) -> Result<(), DatabaseError> {
        let redacted_payload = redact_json(payload);
        let envelope = serde_json::json!({
            "event": event.as_str(),
            "timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "delivery_id": delivery_id,
            "data": redacted_payload,
        });
        let body = serde_json::to_vec(&envelope).expect("envelope serializes");
        let signature = sign_payload(&subscription.secret, &body);

        let result = tokio::time::timeout(
            DELIVERY_TIMEOUT,
            self.client
                .post(&subscription.url)
                .header("Content-Type", "application/json")
                .header("X-Webhook-Signature", signature)
                .header("X-Webhook-Event", event.as_str())
                .header("X-Webhook-Delivery", delivery_id.to_string())
                .header("User-Agent", "queue-core-webhooks/1.0")
                .body(body)
                .send(),
        )
        .await;

        let (status, response_body, error_message) = match result {
            Ok(Ok(response)) => {
                let code = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                let truncated: String = text.chars().take(2000).collect();
                (Some(code), Some(truncated), None)
            }
            Ok(Err(err)) => (None, None, Some(redact_json(&Value::String(err.to_string())))),
            Err(_) => (None, None, Some(Value::String("delivery timed out".to_string()))),
        };

        let is_success = matches!(status, Some(code) if (200..300).contains(&code));
        let is_retryable =
            !is_success && (status.is_none() || matches!(status, Some(code) if code == 429 || code >= 500));

        metrics::counter!(
            "webhook_deliveries_total",
            "event" => event.as_str(),
            "outcome" => if is_success { "delivered" } else if is_retryable { "retrying" } else { "failed" }
        )
        .increment(1);

        let error_message_str = error_message.and_then(|v| v.as_str().map(str::to_string));

        if is_success {
            sqlx::query(
                "UPDATE webhook_deliveries SET status = 'delivered', attempt = $2, \
                 response_status = $3, response_body = $4, error_message = NULL, \
                 next_retry_at = NULL, delivered_at = now() \
                 WHERE id = $1",
            )
            .bind(delivery_id)
            .bind(attempt + 1)
            .bind(status.map(i32::from))
            .bind(&response_body)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        if is_retryable && attempt + 1 < MAX_RETRIES {
            let delay = RETRY_DELAYS_SECONDS[attempt as usize % RETRY_DELAYS_SECONDS.len()];
            sqlx::query(
                "UPDATE webhook_deliveries SET status = 'pending', attempt = $2, \
                 response_status = $3, response_body = $4, error_message = $5, \
                 next_retry_at = now() + make_interval(secs => $6) \
                 WHERE id = $1",
            )
            .bind(delivery_id)
            .bind(attempt + 1)
            .bind(status.map(i32::from))
            .bind(&response_body)
            .bind(&error_message_str)
            .bind(delay as f64)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE webhook_deliveries SET status = 'failed', attempt = $2, \
                 response_status = $3, response_body = $4, error_message = $5, \
                 next_retry_at = NULL \
                 WHERE id = $1",
            )
            .bind(delivery_id)
            .bind(attempt + 1)
            .bind(status.map(i32::from))
            .bind(&response_body)
            .bind(&error_message_str)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Scan for deliveries whose `next_retry_at` has passed, bounded to 100
    /// per call so one slow batch can't starve the retry loop's poll cadence.
    pub async fn process_pending_retries(&self) -> Result<usize, DatabaseError> {
        #[derive(sqlx::FromRow)]
        struct Candidate {
            id: Uuid,
            webhook_id: Uuid,
            event: String,
            payload: Value,
            attempt: i32,
        }

        let candidates = sqlx::query_as::<_, Candidate>(
            "SELECT id, webhook_id, event, payload, attempt FROM webhook_deliveries \
             WHERE status = 'pending' AND next_retry_at <= now() \
             ORDER BY next_retry_at ASC LIMIT 100",
        )
        .fetch_all(&self.pool)
        .await?;

        let count = candidates.len();

        for candidate in candidates {
            let subscription = sqlx::query_as::<_, WebhookSubscription>(
                "SELECT id, tenant_id, url, secret, events, is_active, created_at \
                 FROM webhooks WHERE id = $1",
            )
            .bind(candidate.webhook_id)
            .fetch_optional(&self.pool)
            .await?;

            let Some(subscription) = subscription else {
                continue;
            };
            let event = match candidate.event.as_str() {
                "audit.completed" => WebhookEvent::AuditCompleted,
                "audit.failed" => WebhookEvent::AuditFailed,
                _ => WebhookEvent::QuotaWarning,
            };

            self.deliver(
                &subscription,
                candidate.id,
                event,
                &candidate.payload,
                candidate.attempt,
            )
            .await?;
        }

        Ok(count)
    }

    /// Send a synthetic event so a tenant can verify their endpoint and
    /// secret without waiting for a real audit to complete.
    pub async fn send_test_event(&self, webhook_id: Uuid) -> Result<(), DatabaseError> {
        let subscription = sqlx::query_as::<_, WebhookSubscription>(
            "SELECT id, tenant_id, url, secret, events, is_active, created_at \
             FROM webhooks WHERE id = $1",
        )
        .bind(webhook_id)
        .fetch_one(&self.pool)
        .await?;

        self.create_and_deliver(
            &subscription,
            WebhookEvent::AuditCompleted,
            serde_json::json!({"test": true}),
        )
        .await
    }
}
