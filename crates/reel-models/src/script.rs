//! Scripts and composed final videos.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::backend::BackendId;
use crate::error_kind::ResourceError;
use crate::ids::{ProjectId, SceneId, ScriptId};

/// Decomposition progress of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DecompositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecompositionStatus::Pending => "pending",
            DecompositionStatus::Processing => "processing",
            DecompositionStatus::Completed => "completed",
            DecompositionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DecompositionStatus::Completed | DecompositionStatus::Failed)
    }
}

/// State of the script's final-artifact slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompositionState {
    #[default]
    Idle,
    Composing,
    Completed,
    Error,
}

impl CompositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositionState::Idle => "idle",
            CompositionState::Composing => "composing",
            CompositionState::Completed => "completed",
            CompositionState::Error => "error",
        }
    }
}

/// Pointer from a script to its newest final video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinalVideoRef {
    pub generation: u64,
    pub storage_key: String,
}

/// A long-form script and the bookkeeping for its scenes and final artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Script {
    pub id: ScriptId,
    pub project_id: ProjectId,
    pub text: String,
    pub requested_duration_secs: f64,
    /// Backend preference hints for decomposition, most preferred first.
    #[serde(default)]
    pub preferred_backends: Vec<BackendId>,

    #[serde(default)]
    pub decomposition: DecompositionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decomposition_error: Option<ResourceError>,
    #[serde(default)]
    pub decomposition_attempts: u32,

    /// Current scene version per order slot, indexed by `order`.
    #[serde(default)]
    pub scene_ids: Vec<SceneId>,
    /// Bumped on every change to the set of current or included scenes.
    #[serde(default)]
    pub revision: u64,

    #[serde(default)]
    pub composition: CompositionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_error: Option<ResourceError>,
    /// Number of composition attempts claimed so far. Part of the compose
    /// idempotency key.
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_video: Option<FinalVideoRef>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Script {
    pub fn new(
        project_id: ProjectId,
        text: impl Into<String>,
        requested_duration_secs: f64,
        preferred_backends: Vec<BackendId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ScriptId::new(),
            project_id,
            text: text.into(),
            requested_duration_secs,
            preferred_backends,
            decomposition: DecompositionStatus::Pending,
            decomposition_error: None,
            decomposition_attempts: 0,
            scene_ids: Vec::new(),
            revision: 0,
            composition: CompositionState::Idle,
            composition_error: None,
            generation: 0,
            final_video: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compose idempotency key for the given generation.
    pub fn composition_key(&self, generation: u64) -> String {
        format!("{}:{}", self.id, generation)
    }

    /// Whether `scene_id` is the current version of its slot.
    pub fn is_current(&self, scene_id: &SceneId) -> bool {
        self.scene_ids.iter().any(|id| id == scene_id)
    }
}

/// Immutable record of one successful composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinalVideo {
    pub script_id: ScriptId,
    pub project_id: ProjectId,
    pub generation: u64,
    pub storage_key: String,
    pub duration_secs: f64,
    /// Scenes concatenated, in order.
    pub scene_ids: Vec<SceneId>,
    /// Whether the lossless concat path was used.
    pub lossless: bool,
    pub created_at: DateTime<Utc>,
}

impl FinalVideo {
    /// Record id: one per script generation.
    pub fn record_id(script_id: &ScriptId, generation: u64) -> String {
        format!("{}-{}", script_id, generation)
    }

    pub fn id(&self) -> String {
        Self::record_id(&self.script_id, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_script_defaults() {
        let script = Script::new(ProjectId::from("p1"), "Once upon a time", 12.0, vec![]);
        assert_eq!(script.decomposition, DecompositionStatus::Pending);
        assert_eq!(script.composition, CompositionState::Idle);
        assert_eq!(script.generation, 0);
        assert!(script.final_video.is_none());
        assert_eq!(script.composition_key(1), format!("{}:1", script.id));
    }

    #[test]
    fn test_final_video_record_id() {
        let id = ScriptId::from("s1");
        assert_eq!(FinalVideo::record_id(&id, 3), "s1-3");
    }
}
