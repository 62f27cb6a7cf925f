//! Job intake (§6): the one write path external callers use to enqueue an
//! audit. Quota and idempotency enforcement live in [`queue_core::job`];
//! this handler just translates the request body and surfaces the outcome.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use queue_core::job::{AuditJobPayload, JobStore};
use serde::Serialize;

use crate::state::AppState;

pub async fn enqueue(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<AuditJobPayload>,
) -> Result<(StatusCode, Json<EnqueueResponse>), (StatusCode, Json<serde_json::Value>)> {
    let tenant_id = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "missing x-tenant-id header"})),
        ))?;

    let job_store = JobStore::new(state.pool.clone());
    let job = job_store
        .enqueue(&state.quotas, &tenant_id, payload, 5)
        .await
        .map_err(|err| match err {
            queue_core::error::EnqueueError::QuotaExceeded { kind, limit, used } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({"kind": kind, "limit": limit, "used": used})),
            ),
            queue_core::error::EnqueueError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            ),
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    job_id: uuid::Uuid,
    status: queue_core::job::JobStatus,
}
