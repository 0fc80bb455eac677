//! Store metrics.

use metrics::{counter, histogram};

/// Metric name constants.
pub mod names {
    /// Firestore requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "reel_store_requests_total";

    /// Firestore request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "reel_store_latency_seconds";

    /// Transport-level retries by operation.
    pub const RETRIES_TOTAL: &str = "reel_store_retries_total";

    /// Optimistic-concurrency conflicts by operation.
    pub const CAS_CONFLICTS_TOTAL: &str = "reel_store_cas_conflicts_total";
}

/// Record metrics for a completed Firestore request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_cas_conflict(operation: &str) {
    counter!(names::CAS_CONFLICTS_TOTAL, "operation" => operation.to_string()).increment(1);
}
