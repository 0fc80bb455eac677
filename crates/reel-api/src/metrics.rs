//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Install the Prometheus recorder and return a handle for rendering.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "reel_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "reel_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "reel_http_requests_in_flight";

    pub const RATE_LIMIT_HITS_TOTAL: &str = "reel_rate_limit_hits_total";
    pub const CALLBACKS_REJECTED_TOTAL: &str = "reel_callbacks_rejected_total";
    pub const COMPOSE_REQUESTS_TOTAL: &str = "reel_compose_requests_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Record a decomposition callback refused before reaching the pipeline.
pub fn record_callback_rejected(reason: &'static str) {
    counter!(names::CALLBACKS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record the outcome of a compose request.
pub fn record_compose_request(outcome: &'static str) {
    counter!(names::COMPOSE_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
            .expect("valid id pattern")
    })
}

/// Sanitize path for metrics labels (ids become `:id`).
fn sanitize_path(path: &str) -> String {
    id_pattern().replace_all(path, ":id").into_owned()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    // Timed-out requests drop this future before it returns.
    let _in_flight = scopeguard::guard((), |_| {
        gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);
    });
    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/scenes/550e8400-e29b-41d4-a716-446655440000/video"),
            "/api/scenes/:id/video"
        );
        assert_eq!(
            sanitize_path(
                "/api/projects/550e8400-e29b-41d4-a716-446655440000/scripts/6ba7b810-9dad-11d1-80b4-00c04fd430c8/compose"
            ),
            "/api/projects/:id/scripts/:id/compose"
        );
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
