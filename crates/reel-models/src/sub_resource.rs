//! Per-scene generation tracks and their state machine.
//!
//! Every state change goes through [`SubResourceState::transition`]. Poll
//! results and inbound callbacks use the same function, so the state machine
//! does not care which trigger caused a transition.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::backend::BackendId;
use crate::error_kind::ResourceError;
use crate::ids::JobHandle;

/// One independent generation track of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubResourceKind {
    Preview,
    Video,
    Audio,
    /// Per-scene video+audio mux.
    Final,
}

impl SubResourceKind {
    pub const GENERATED: [SubResourceKind; 3] = [
        SubResourceKind::Preview,
        SubResourceKind::Video,
        SubResourceKind::Audio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubResourceKind::Preview => "preview",
            SubResourceKind::Video => "video",
            SubResourceKind::Audio => "audio",
            SubResourceKind::Final => "final",
        }
    }

    /// File extension used in storage keys.
    pub fn extension(&self) -> &'static str {
        match self {
            SubResourceKind::Preview => "png",
            SubResourceKind::Video | SubResourceKind::Final => "mp4",
            SubResourceKind::Audio => "mp3",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            SubResourceKind::Preview => "image/png",
            SubResourceKind::Video | SubResourceKind::Final => "video/mp4",
            SubResourceKind::Audio => "audio/mpeg",
        }
    }
}

impl fmt::Display for SubResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubResourceKind {
    type Err = SubResourceKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preview" | "image" => Ok(SubResourceKind::Preview),
            "video" => Ok(SubResourceKind::Video),
            "audio" => Ok(SubResourceKind::Audio),
            "final" => Ok(SubResourceKind::Final),
            _ => Err(SubResourceKindParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown sub-resource kind: {0}")]
pub struct SubResourceKindParseError(String);

/// Sub-resource state. Moves only forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubResourceState {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
}

impl SubResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubResourceState::Pending => "pending",
            SubResourceState::Processing => "processing",
            SubResourceState::Completed => "completed",
            SubResourceState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubResourceState::Completed | SubResourceState::Error)
    }

    /// Apply a transition.
    ///
    /// Allowed: `pending → processing`, `pending → error` (rejected before
    /// submission), `processing → completed`, `processing → error`.
    pub fn transition(self, to: SubResourceState) -> Result<SubResourceState, TransitionError> {
        use SubResourceState::*;
        match (self, to) {
            (Pending, Processing) | (Pending, Error) | (Processing, Completed) | (Processing, Error) => Ok(to),
            (from, to) if from.is_terminal() => Err(TransitionError::Terminal { from, to }),
            (from, to) => Err(TransitionError::Invalid { from, to }),
        }
    }
}

impl fmt::Display for SubResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("sub-resource already terminal ({from}), cannot move to {to}")]
    Terminal {
        from: SubResourceState,
        to: SubResourceState,
    },
    #[error("invalid transition {from} -> {to}")]
    Invalid {
        from: SubResourceState,
        to: SubResourceState,
    },
}

/// Active external job for a sub-resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationJob {
    pub backend: BackendId,
    pub handle: JobHandle,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
}

impl GenerationJob {
    pub fn new(backend: BackendId, handle: JobHandle) -> Self {
        Self {
            backend,
            handle,
            submitted_at: Utc::now(),
            last_polled_at: None,
            attempts: 0,
        }
    }

    /// Seconds since submission.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.submitted_at).num_seconds()
    }
}

/// State triple for one track of a scene.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SubResource {
    #[serde(default)]
    pub state: SubResourceState,
    /// Storage key of the finished artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResourceError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<GenerationJob>,
    /// Set once credits were charged for this track.
    #[serde(default)]
    pub charged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SubResource {
    pub fn is_completed(&self) -> bool {
        self.state == SubResourceState::Completed
    }

    /// Apply an update through the state machine.
    pub fn apply(&mut self, update: &SubResourceUpdate) -> Result<(), TransitionError> {
        let next = self.state.transition(update.to)?;
        self.state = next;
        if let Some(job) = &update.job {
            self.job = Some(job.clone());
        }
        if let Some(key) = &update.artifact_key {
            self.artifact_key = Some(key.clone());
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        self.updated_at = Some(Utc::now());
        Ok(())
    }
}

/// A conditional sub-resource state change: applied only when the current
/// state equals `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubResourceUpdate {
    pub from: SubResourceState,
    pub to: SubResourceState,
    pub job: Option<GenerationJob>,
    pub artifact_key: Option<String>,
    pub error: Option<ResourceError>,
}

impl SubResourceUpdate {
    /// `pending → processing` with the submitted job.
    pub fn submitted(job: GenerationJob) -> Self {
        Self {
            from: SubResourceState::Pending,
            to: SubResourceState::Processing,
            job: Some(job),
            artifact_key: None,
            error: None,
        }
    }

    /// `pending → error`, no job was ever created.
    pub fn rejected(error: ResourceError) -> Self {
        Self {
            from: SubResourceState::Pending,
            to: SubResourceState::Error,
            job: None,
            artifact_key: None,
            error: Some(error),
        }
    }

    /// `processing → completed` with the stored artifact.
    pub fn completed(artifact_key: impl Into<String>) -> Self {
        Self {
            from: SubResourceState::Processing,
            to: SubResourceState::Completed,
            job: None,
            artifact_key: Some(artifact_key.into()),
            error: None,
        }
    }

    /// `processing → error`.
    pub fn failed(error: ResourceError) -> Self {
        Self {
            from: SubResourceState::Processing,
            to: SubResourceState::Error,
            job: None,
            artifact_key: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_kind::ErrorKind;

    #[test]
    fn test_forward_transitions() {
        use SubResourceState::*;
        assert_eq!(Pending.transition(Processing), Ok(Processing));
        assert_eq!(Pending.transition(Error), Ok(Error));
        assert_eq!(Processing.transition(Completed), Ok(Completed));
        assert_eq!(Processing.transition(Error), Ok(Error));
    }

    #[test]
    fn test_backward_and_terminal_transitions_rejected() {
        use SubResourceState::*;
        assert!(matches!(
            Completed.transition(Processing),
            Err(TransitionError::Terminal { .. })
        ));
        assert!(matches!(
            Error.transition(Completed),
            Err(TransitionError::Terminal { .. })
        ));
        assert!(matches!(
            Processing.transition(Pending),
            Err(TransitionError::Invalid { .. })
        ));
        assert!(matches!(
            Pending.transition(Completed),
            Err(TransitionError::Invalid { .. })
        ));
    }

    #[test]
    fn test_apply_records_artifact_and_error() {
        let mut sub = SubResource::default();
        let job = GenerationJob::new(BackendId::Clip, JobHandle::new("job-1"));
        sub.apply(&SubResourceUpdate::submitted(job)).unwrap();
        assert_eq!(sub.state, SubResourceState::Processing);
        assert!(sub.job.is_some());

        sub.apply(&SubResourceUpdate::completed("p/s/0-x/video.mp4"))
            .unwrap();
        assert!(sub.is_completed());
        assert_eq!(sub.artifact_key.as_deref(), Some("p/s/0-x/video.mp4"));

        let err = sub
            .apply(&SubResourceUpdate::failed(ResourceError::new(
                ErrorKind::ProviderRejection,
                "late failure",
            )))
            .unwrap_err();
        assert!(matches!(err, TransitionError::Terminal { .. }));
        assert!(sub.error.is_none());
    }

    #[test]
    fn test_kind_parse_and_extension() {
        assert_eq!("video".parse::<SubResourceKind>().unwrap(), SubResourceKind::Video);
        assert_eq!(SubResourceKind::Audio.extension(), "mp3");
        assert!("thumbnail".parse::<SubResourceKind>().is_err());
    }
}
