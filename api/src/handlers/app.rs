//! Route wiring for the management API (§6.1).
//!
//! Grounded on `hook-api/src/handlers/app.rs`'s `add_routes`: a bare
//! index/readiness/liveness surface plus whatever state-bearing routes the
//! crate adds, all attached to one `Router`.

use axum::{routing, Router};

use super::{jobs, webhooks};
use crate::state::AppState;

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(liveness))
        .route(
            "/webhooks",
            routing::post(webhooks::create).get(webhooks::list),
        )
        .route("/webhooks/:id", routing::delete(webhooks::delete))
        .route("/webhooks/:id/deliveries", routing::get(webhooks::deliveries))
        .route("/webhooks/:id/test", routing::post(webhooks::send_test))
        .route("/jobs", routing::post(jobs::enqueue))
}

pub async fn index() -> &'static str {
    "queue-core api"
}

async fn liveness(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::http::StatusCode {
    if state.health.get_status().await.healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use sqlx::PgPool;
    use tower::ServiceExt;

    #[sqlx::test(migrations = "../queue-core/migrations")]
    async fn index_returns_ok(db: PgPool) {
        let state = AppState::for_test(db);
        let app = add_routes(Router::new()).with_state(state);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"queue-core api");
    }

    #[sqlx::test(migrations = "../queue-core/migrations")]
    async fn liveness_is_unhealthy_until_a_component_reports(db: PgPool) {
        let state = AppState::for_test(db);
        let app = add_routes(Router::new()).with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/_liveness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
