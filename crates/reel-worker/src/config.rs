//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent tasks
    pub max_concurrent_jobs: usize,
    /// Per-task wall-clock limit
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// How often the worker should scan for orphaned pending tasks
    pub claim_interval: Duration,
    /// Minimum idle time before a pending task can be claimed
    pub claim_min_idle: Duration,
    /// How often due delayed tasks are promoted into the stream
    pub promote_interval: Duration,
    /// Delay between polls of one processing sub-resource
    pub poll_interval: Duration,
    /// A job still unfinished this long after submission is failed
    pub max_poll_duration: Duration,
    /// Wall-clock limit for one FFmpeg concat or mux
    pub compose_timeout: Duration,
    /// Allowed relative drift of the decomposed total duration
    pub duration_tolerance: f64,
    /// Largest correction (seconds) applied to a scene duration without review
    pub correction_threshold_secs: f64,
    /// Prometheus listener address, if any
    pub metrics_addr: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            job_timeout: Duration::from_secs(900),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/reel"),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
            promote_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(10),
            max_poll_duration: Duration::from_secs(1800),
            compose_timeout: Duration::from_secs(600),
            duration_tolerance: 0.15,
            correction_threshold_secs: 4.0,
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_CONCURRENT_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: env_parse("WORKER_JOB_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            promote_interval: env_parse("WORKER_PROMOTE_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.promote_interval),
            poll_interval: env_parse("POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            max_poll_duration: env_parse("MAX_POLL_DURATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_poll_duration),
            compose_timeout: env_parse("COMPOSE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compose_timeout),
            duration_tolerance: env_parse("DECOMPOSITION_DURATION_TOLERANCE")
                .unwrap_or(defaults.duration_tolerance),
            correction_threshold_secs: env_parse("DECOMPOSITION_CORRECTION_THRESHOLD_SECS")
                .unwrap_or(defaults.correction_threshold_secs),
            metrics_addr: std::env::var("WORKER_METRICS_ADDR").ok(),
        }
    }
}
