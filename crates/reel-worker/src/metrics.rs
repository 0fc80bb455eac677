//! Worker metrics.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

pub mod names {
    /// Tasks processed by type and outcome.
    pub const TASKS_TOTAL: &str = "reel_worker_tasks_total";

    pub const TASK_DURATION_SECONDS: &str = "reel_worker_task_duration_seconds";

    pub const TASKS_IN_FLIGHT: &str = "reel_worker_tasks_in_flight";

    /// Poll observations by backend, kind and status.
    pub const POLL_OUTCOMES_TOTAL: &str = "reel_poll_outcomes_total";

    /// Sub-resources reaching a terminal state.
    pub const SUB_RESOURCE_TERMINAL_TOTAL: &str = "reel_sub_resource_terminal_total";

    pub const COMPOSE_DURATION_SECONDS: &str = "reel_compose_duration_seconds";

    pub const COMPOSITIONS_TOTAL: &str = "reel_compositions_total";

    /// Scene durations corrected or flagged during decomposition.
    pub const DURATION_CORRECTIONS_TOTAL: &str = "reel_duration_corrections_total";

    pub const CREDITS_CHARGED_TOTAL: &str = "reel_credits_charged_total";
}

pub fn record_task(job_type: &'static str, outcome: &'static str, elapsed: Duration) {
    counter!(names::TASKS_TOTAL, "type" => job_type, "outcome" => outcome).increment(1);
    histogram!(names::TASK_DURATION_SECONDS, "type" => job_type).record(elapsed.as_secs_f64());
}

pub fn set_tasks_in_flight(count: usize) {
    gauge!(names::TASKS_IN_FLIGHT).set(count as f64);
}

pub fn record_poll(backend: &'static str, kind: &'static str, status: &'static str) {
    counter!(
        names::POLL_OUTCOMES_TOTAL,
        "backend" => backend,
        "kind" => kind,
        "status" => status
    )
    .increment(1);
}

pub fn record_terminal(kind: &'static str, state: &'static str) {
    counter!(names::SUB_RESOURCE_TERMINAL_TOTAL, "kind" => kind, "state" => state).increment(1);
}

pub fn record_composition(outcome: &'static str, lossless: Option<bool>, elapsed: Duration) {
    let path = match lossless {
        Some(true) => "copy",
        Some(false) => "reencode",
        None => "none",
    };
    counter!(names::COMPOSITIONS_TOTAL, "outcome" => outcome, "path" => path).increment(1);
    histogram!(names::COMPOSE_DURATION_SECONDS, "outcome" => outcome).record(elapsed.as_secs_f64());
}

pub fn record_duration_correction(backend: &'static str, outcome: &'static str) {
    counter!(names::DURATION_CORRECTIONS_TOTAL, "backend" => backend, "outcome" => outcome)
        .increment(1);
}

pub fn record_credits(backend: &'static str, kind: &'static str, credits: u32) {
    counter!(names::CREDITS_CHARGED_TOTAL, "backend" => backend, "kind" => kind)
        .increment(u64::from(credits));
}
