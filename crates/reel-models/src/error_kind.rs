//! Machine-readable failure kinds carried on every error state.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy shared by sub-resources, scripts and API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Spec violates a declared capability domain. Never reaches a provider.
    ConfigurationError,
    /// Network failure or timeout talking to a provider.
    TransientProviderError,
    /// Provider explicitly failed the job.
    ProviderRejection,
    /// Reasoning call failed or returned unusable output.
    DecompositionError,
    /// Multiplexing failed or timed out.
    CompositionError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::TransientProviderError => "transient_provider_error",
            ErrorKind::ProviderRejection => "provider_rejection",
            ErrorKind::DecompositionError => "decomposition_error",
            ErrorKind::CompositionError => "composition_error",
        }
    }

    /// Whether regenerating the affected sub-resource can help.
    pub fn is_regenerable(&self) -> bool {
        !matches!(self, ErrorKind::ConfigurationError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error attached to a persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ResourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
