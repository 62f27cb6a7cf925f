//! Webhook subscription CRUD (§6.1, C4).
//!
//! Grounded on `apps/api/routers/webhooks.py`: every route is scoped to the
//! calling tenant via the trusted `X-Tenant-Id` header set by the gateway in
//! front of this service (this API does not itself authenticate tenants).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

fn tenant_id(headers: &axum::http::HeaderMap) -> Result<String, StatusCode> {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(StatusCode::UNAUTHORIZED)
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub events: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub is_active: bool,
    /// Only populated by [`create`] — the secret is returned once, at
    /// creation, and never again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateWebhookRequest>,
) -> Result<(StatusCode, Json<WebhookResponse>), StatusCode> {
    let tenant_id = tenant_id(&headers)?;
    let subscription = state
        .webhooks
        .create_webhook(&tenant_id, &body.url, &body.events)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    Ok((
        StatusCode::CREATED,
        Json(WebhookResponse {
            id: subscription.id,
            url: subscription.url,
            events: subscription.events,
            is_active: subscription.is_active,
            secret: Some(subscription.secret),
        }),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<Vec<WebhookResponse>>, StatusCode> {
    let tenant_id = tenant_id(&headers)?;
    let subscriptions = state
        .webhooks
        .list_webhooks(&tenant_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(
        subscriptions
            .into_iter()
            .map(|s| WebhookResponse {
                id: s.id,
                url: s.url,
                events: s.events,
                is_active: s.is_active,
                secret: None,
            })
            .collect(),
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let tenant_id = tenant_id(&headers)?;
    state
        .webhooks
        .delete_webhook(&tenant_id, id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let deliveries = state
        .webhooks
        .list_deliveries(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!(deliveries
        .into_iter()
        .map(|d| serde_json::json!({
            "id": d.id,
            "event": d.event,
            "status": d.status,
            "attempt": d.attempt,
            "response_status": d.response_status,
            "response_body": d.response_body,
            "error_message": d.error_message,
            "delivered_at": d.delivered_at,
        }))
        .collect::<Vec<_>>())))
}

pub async fn send_test(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    state
        .webhooks
        .send_test_event(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::ACCEPTED)
}
