//! Structured task logging.

use tracing::{error, info, warn, Span};

use reel_queue::QueueJob;

/// Consistent start/progress/completion lines for one queue task.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: &'static str,
}

impl JobLogger {
    pub fn new(job: &QueueJob) -> Self {
        Self {
            job_id: job.job_id().to_string(),
            operation: job.job_type(),
        }
    }

    pub fn from_parts(job_id: &str, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Task started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Task progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            "Task warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            "Task error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Task completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Span carrying the task identity.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("task", job_id = %self.job_id, operation = self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{ProjectId, ScriptId};
    use reel_queue::DecomposeScriptJob;

    #[test]
    fn test_job_logger_from_job() {
        let job = QueueJob::DecomposeScript(DecomposeScriptJob::new(
            ProjectId::from("p1"),
            ScriptId::from("s1"),
        ));
        let logger = JobLogger::new(&job);
        assert_eq!(logger.job_id(), job.job_id());
        assert_eq!(logger.operation(), "decompose_script");
    }
}
