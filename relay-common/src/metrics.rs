use std::time::Instant;

use axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const POSTS_PUBLISHED: &str = "relay_posts_published_total";
pub const POSTS_FAILED: &str = "relay_posts_failed_total";
pub const MEDIA_PUBLISHED: &str = "relay_media_published_total";
pub const MEDIA_DROPPED: &str = "relay_media_dropped_total";
pub const MALFORMED_PAYLOADS: &str = "relay_malformed_payloads_total";
pub const AUTH_FAILURES: &str = "relay_auth_failures_total";
pub const NOTIFICATION_DURATION: &str = "relay_notification_duration_seconds";

/// Install the global Prometheus recorder. Only call this once per process: tests
/// build routers without it.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    // Uploading videos routinely takes longer than 10s, hence the longer tail.
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

pub const HTTP_REQUESTS: &str = "relay_http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "relay_http_request_duration_seconds";

/// Label for the route a request hit. Paths that matched no route share one label.
fn route_label(req: &Request<Body>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_owned(), |path| path.as_str().to_owned())
}

/// Record request counts and latencies per route and status.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let route = route_label(&req);
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("route", route),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!(HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());

    response
}
