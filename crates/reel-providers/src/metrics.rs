//! Provider metrics.

use std::time::Duration;

use metrics::{counter, histogram};

pub mod names {
    /// Provider HTTP calls by provider, operation and status.
    pub const REQUESTS_TOTAL: &str = "reel_provider_requests_total";

    pub const LATENCY_SECONDS: &str = "reel_provider_latency_seconds";

    /// Artifact download retries by provider.
    pub const FETCH_RETRIES_TOTAL: &str = "reel_provider_fetch_retries_total";
}

pub fn record_provider_request(provider: &str, operation: &str, status: u16, latency: Duration) {
    counter!(
        names::REQUESTS_TOTAL,
        "provider" => provider.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "provider" => provider.to_string(),
        "operation" => operation.to_string()
    )
    .record(latency.as_secs_f64());
}

pub fn record_fetch_retry(provider: &str) {
    counter!(names::FETCH_RETRIES_TOTAL, "provider" => provider.to_string()).increment(1);
}
