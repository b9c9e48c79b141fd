use axum::{extract::DefaultBodyLimit, middleware, routing, Router};
use relay_common::metrics::track_metrics;
use tower_http::trace::TraceLayer;

use super::webhook::{self, WebhookState};

pub fn add_routes(router: Router, state: WebhookState, max_body_size: usize) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No dependencies to check, just axum health
        .route(
            "/webhook",
            routing::get(webhook::verify)
                .post(webhook::notify)
                .with_state(state)
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(track_metrics))
}

pub async fn index() -> &'static str {
    "page relay api"
}
