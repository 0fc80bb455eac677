//! Provider error types.

use reel_models::{BackendId, CapabilityViolation, ErrorKind};
use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request violates the backend's declared capabilities. Raised
    /// before any remote call.
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(#[from] CapabilityViolation),

    #[error("Backend not configured: {0}")]
    NotConfigured(BackendId),

    /// The provider refused or failed the job.
    #[error("Provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Rate limits, 5xx and timeouts.
    #[error("Provider unavailable: {0}")]
    Transient(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn rejected(status: u16, msg: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: msg.into(),
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            408 | 429 | 500..=599 => Self::Transient(format!("HTTP {}: {}", status, body)),
            _ => Self::rejected(status, body),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transient(_) | ProviderError::Io(_) => true,
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }

    /// Error kind recorded on the sub-resource.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::UnsupportedConfiguration(_) | ProviderError::NotConfigured(_) => {
                ErrorKind::ConfigurationError
            }
            ProviderError::Rejected { .. } | ProviderError::InvalidResponse(_) => {
                ErrorKind::ProviderRejection
            }
            ProviderError::Transient(_) | ProviderError::Http(_) | ProviderError::Io(_) => {
                ErrorKind::TransientProviderError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::SubResourceKind;

    #[test]
    fn test_status_classification() {
        assert!(ProviderError::from_status(503, "busy").is_retryable());
        assert!(ProviderError::from_status(429, "slow down").is_retryable());

        let rejected = ProviderError::from_status(422, "prompt blocked");
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.kind(), ErrorKind::ProviderRejection);
    }

    #[test]
    fn test_capability_violation_is_configuration_error() {
        let err = ProviderError::from(CapabilityViolation::UnsupportedKind {
            backend: BackendId::Clip,
            kind: SubResourceKind::Audio,
        });
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(!err.is_retryable());
    }
}
