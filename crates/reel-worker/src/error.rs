//! Worker error types.

use reel_models::{ErrorKind, ResourceError};
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Reasoning call failed: {0}")]
    ReasoningFailed(String),

    #[error("Decomposition rejected: {0}")]
    DecompositionRejected(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Provider error: {0}")]
    Provider(#[from] reel_providers::ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] reel_store::StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] reel_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn reasoning_failed(msg: impl Into<String>) -> Self {
        Self::ReasoningFailed(msg.into())
    }

    pub fn decomposition_rejected(msg: impl Into<String>) -> Self {
        Self::DecompositionRejected(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Provider(e) => e.is_retryable(),
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::Queue(e) => e.is_retryable(),
            WorkerError::ReasoningFailed(_) | WorkerError::Timeout(_) | WorkerError::Io(_) => true,
            _ => false,
        }
    }

    /// Record the error on a persisted state with the given kind.
    pub fn to_resource_error(&self, kind: ErrorKind) -> ResourceError {
        let message = match self {
            WorkerError::Media(e) => e.detail(),
            other => other.to_string(),
        };
        ResourceError::new(kind, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_providers::ProviderError;

    #[test]
    fn test_retry_classification_follows_source() {
        assert!(WorkerError::from(ProviderError::transient("503")).is_retryable());
        assert!(!WorkerError::from(ProviderError::rejected(422, "nsfw")).is_retryable());
        assert!(!WorkerError::invalid_request("empty script").is_retryable());
        assert!(WorkerError::Timeout(30).is_retryable());
    }

    #[test]
    fn test_to_resource_error_keeps_kind() {
        let err = WorkerError::job_failed("boom").to_resource_error(ErrorKind::CompositionError);
        assert_eq!(err.kind, ErrorKind::CompositionError);
        assert_eq!(err.message, "Job failed: boom");
    }
}
