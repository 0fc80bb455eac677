//! Pipeline events published to the notification sink.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error_kind::ResourceError;
use crate::ids::{ProjectId, SceneId, ScriptId};
use crate::sub_resource::{SubResourceKind, SubResourceState};

/// Event emitted whenever durable pipeline state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    DecompositionCompleted {
        script_id: ScriptId,
        scene_count: usize,
    },
    DecompositionFailed {
        script_id: ScriptId,
        error: ResourceError,
    },
    ManualReviewRequested {
        script_id: ScriptId,
        scene_id: SceneId,
        requested_secs: f64,
        nearest_secs: f64,
    },
    SubResourceChanged {
        script_id: ScriptId,
        scene_id: SceneId,
        kind: SubResourceKind,
        state: SubResourceState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ResourceError>,
    },
    SceneRegenerated {
        script_id: ScriptId,
        scene_id: SceneId,
        parent_scene: SceneId,
        version: u32,
    },
    CompositionStarted {
        script_id: ScriptId,
        generation: u64,
    },
    CompositionCompleted {
        script_id: ScriptId,
        generation: u64,
        storage_key: String,
    },
    CompositionFailed {
        script_id: ScriptId,
        generation: u64,
        error: ResourceError,
    },
}

impl PipelineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::DecompositionCompleted { .. } => "decomposition_completed",
            PipelineEvent::DecompositionFailed { .. } => "decomposition_failed",
            PipelineEvent::ManualReviewRequested { .. } => "manual_review_requested",
            PipelineEvent::SubResourceChanged { .. } => "sub_resource_changed",
            PipelineEvent::SceneRegenerated { .. } => "scene_regenerated",
            PipelineEvent::CompositionStarted { .. } => "composition_started",
            PipelineEvent::CompositionCompleted { .. } => "composition_completed",
            PipelineEvent::CompositionFailed { .. } => "composition_failed",
        }
    }
}

/// Event plus routing metadata, as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventEnvelope {
    pub project_id: ProjectId,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: PipelineEvent,
}

impl EventEnvelope {
    pub fn new(project_id: ProjectId, event: PipelineEvent) -> Self {
        Self {
            project_id,
            emitted_at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = PipelineEvent::CompositionStarted {
            script_id: ScriptId::from("s1"),
            generation: 2,
        };
        let json = serde_json::to_value(EventEnvelope::new(ProjectId::from("p1"), event)).unwrap();
        assert_eq!(json["type"], "composition_started");
        assert_eq!(json["project_id"], "p1");
        assert_eq!(json["generation"], 2);
    }
}
