//! Scenes and their immutable version chain.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::backend::{AspectRatio, BackendId};
use crate::ids::{ProjectId, SceneId, ScriptId};
use crate::sub_resource::{SubResource, SubResourceKind, SubResourceState};

/// Backend-specific configuration carried by a scene.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SceneConfig {
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub reference_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Ask the video backend for audio baked into the video.
    #[serde(default)]
    pub with_audio: bool,
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Validated output of decomposition for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneDraft {
    pub narration: String,
    pub visual_directive: String,
    pub duration_secs: f64,
    pub backend: BackendId,
    #[serde(default)]
    pub config: SceneConfig,
    #[serde(default)]
    pub needs_review: bool,
}

/// Content changes requested when regenerating a scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SceneChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_directive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SceneConfig>,
}

fn default_true() -> bool {
    true
}

/// One version of one narrated/visual segment of a script.
///
/// A scene record is never reset. Regeneration creates a child record via
/// [`Scene::next_version`] and leaves this one untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    pub id: SceneId,
    pub project_id: ProjectId,
    pub script_id: ScriptId,
    /// Dense position within the script, starting at 0.
    pub order: u32,
    pub narration: String,
    pub visual_directive: String,
    pub duration_secs: f64,
    pub backend: BackendId,
    #[serde(default)]
    pub config: SceneConfig,
    #[serde(default)]
    pub preview: SubResource,
    #[serde(default)]
    pub video: SubResource,
    #[serde(default)]
    pub audio: SubResource,
    /// Muxed video+audio, only used when the scene needs combination.
    #[serde(default, rename = "final")]
    pub final_cut: SubResource,
    #[serde(default = "default_true")]
    pub is_included: bool,
    /// Decomposition could not fit the duration to the backend's domain.
    #[serde(default)]
    pub needs_review: bool,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_scene: Option<SceneId>,
    pub created_at: DateTime<Utc>,
}

impl Scene {
    /// First version of a scene from a decomposition draft.
    pub fn from_draft(
        project_id: ProjectId,
        script_id: ScriptId,
        order: u32,
        draft: SceneDraft,
    ) -> Self {
        Self {
            id: SceneId::new(),
            project_id,
            script_id,
            order,
            narration: draft.narration,
            visual_directive: draft.visual_directive,
            duration_secs: draft.duration_secs,
            backend: draft.backend,
            config: draft.config,
            preview: SubResource::default(),
            video: SubResource::default(),
            audio: SubResource::default(),
            final_cut: SubResource::default(),
            is_included: true,
            needs_review: draft.needs_review,
            version: 1,
            parent_scene: None,
            created_at: Utc::now(),
        }
    }

    /// Build the child version. `self` is not modified.
    pub fn next_version(&self, changes: SceneChanges) -> Scene {
        Scene {
            id: SceneId::new(),
            project_id: self.project_id.clone(),
            script_id: self.script_id.clone(),
            order: self.order,
            narration: changes.narration.unwrap_or_else(|| self.narration.clone()),
            visual_directive: changes
                .visual_directive
                .unwrap_or_else(|| self.visual_directive.clone()),
            duration_secs: changes.duration_secs.unwrap_or(self.duration_secs),
            backend: changes.backend.unwrap_or(self.backend),
            config: changes.config.unwrap_or_else(|| self.config.clone()),
            preview: SubResource::default(),
            video: SubResource::default(),
            audio: SubResource::default(),
            final_cut: SubResource::default(),
            is_included: true,
            needs_review: false,
            version: self.version + 1,
            parent_scene: Some(self.id.clone()),
            created_at: Utc::now(),
        }
    }

    pub fn sub_resource(&self, kind: SubResourceKind) -> &SubResource {
        match kind {
            SubResourceKind::Preview => &self.preview,
            SubResourceKind::Video => &self.video,
            SubResourceKind::Audio => &self.audio,
            SubResourceKind::Final => &self.final_cut,
        }
    }

    pub fn sub_resource_mut(&mut self, kind: SubResourceKind) -> &mut SubResource {
        match kind {
            SubResourceKind::Preview => &mut self.preview,
            SubResourceKind::Video => &mut self.video,
            SubResourceKind::Audio => &mut self.audio,
            SubResourceKind::Final => &mut self.final_cut,
        }
    }

    pub fn state(&self, kind: SubResourceKind) -> SubResourceState {
        self.sub_resource(kind).state
    }

    pub fn has_narration(&self) -> bool {
        !self.narration.trim().is_empty()
    }
}

/// Current version of every order slot: records that no other record names
/// as its parent. Sorted by `order`.
pub fn current_scenes(scenes: &[Scene]) -> Vec<&Scene> {
    let parents: HashSet<&SceneId> = scenes
        .iter()
        .filter_map(|s| s.parent_scene.as_ref())
        .collect();
    let mut current: Vec<&Scene> = scenes
        .iter()
        .filter(|s| !parents.contains(&s.id))
        .collect();
    current.sort_by_key(|s| s.order);
    current
}

/// True when the given scenes occupy orders `0..n` exactly once each.
pub fn orders_are_dense(scenes: &[&Scene]) -> bool {
    let mut orders: Vec<u32> = scenes.iter().map(|s| s.order).collect();
    orders.sort_unstable();
    orders.iter().enumerate().all(|(i, o)| *o == i as u32)
}

/// Ancestors of `id`, oldest first, ending with `id` itself.
pub fn lineage<'a>(scenes: &'a [Scene], id: &SceneId) -> Vec<&'a Scene> {
    let mut chain = Vec::new();
    let mut cursor = scenes.iter().find(|s| &s.id == id);
    while let Some(scene) = cursor {
        chain.push(scene);
        cursor = scene
            .parent_scene
            .as_ref()
            .and_then(|parent| scenes.iter().find(|s| &s.id == parent));
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(duration: f64) -> SceneDraft {
        SceneDraft {
            narration: "Welcome to the harbour.".to_string(),
            visual_directive: "Wide shot of boats at sunrise".to_string(),
            duration_secs: duration,
            backend: BackendId::Cinematic,
            config: SceneConfig::default(),
            needs_review: false,
        }
    }

    fn scene(order: u32) -> Scene {
        Scene::from_draft(
            ProjectId::from("p1"),
            ScriptId::from("s1"),
            order,
            draft(4.0),
        )
    }

    #[test]
    fn test_next_version_links_parent() {
        let old = scene(2);
        let snapshot = old.clone();
        let new = old.next_version(SceneChanges {
            narration: Some("New line".to_string()),
            ..Default::default()
        });

        assert_eq!(new.parent_scene.as_ref(), Some(&old.id));
        assert_eq!(new.version, old.version + 1);
        assert_eq!(new.order, 2);
        assert_eq!(new.narration, "New line");
        assert_eq!(new.visual_directive, old.visual_directive);
        assert_ne!(new.id, old.id);
        assert_eq!(old, snapshot);
    }

    #[test]
    fn test_current_scenes_skips_parents() {
        let a = scene(0);
        let b = scene(1);
        let b2 = b.next_version(SceneChanges::default());
        let b3 = b2.next_version(SceneChanges::default());
        let all = vec![b3.clone(), a.clone(), b.clone(), b2.clone()];

        let current = current_scenes(&all);
        let ids: Vec<&SceneId> = current.iter().map(|s| &s.id).collect();
        assert_eq!(ids, vec![&a.id, &b3.id]);
        assert!(orders_are_dense(&current));
    }

    #[test]
    fn test_orders_are_dense() {
        let a = scene(0);
        let c = scene(2);
        assert!(!orders_are_dense(&[&a, &c]));
        let dup = scene(0);
        assert!(!orders_are_dense(&[&a, &dup]));
    }

    #[test]
    fn test_lineage() {
        let v1 = scene(0);
        let v2 = v1.next_version(SceneChanges::default());
        let v3 = v2.next_version(SceneChanges::default());
        let all = vec![v3.clone(), v1.clone(), v2.clone()];
        let chain: Vec<u32> = lineage(&all, &v3.id).iter().map(|s| s.version).collect();
        assert_eq!(chain, vec![1, 2, 3]);
    }

    #[test]
    fn test_scene_serde_defaults() {
        let s = scene(0);
        let mut json = serde_json::to_value(&s).unwrap();
        json.as_object_mut().unwrap().remove("is_included");
        json.as_object_mut().unwrap().remove("final");
        let parsed: Scene = serde_json::from_value(json).unwrap();
        assert!(parsed.is_included);
        assert_eq!(parsed.final_cut.state, SubResourceState::Pending);
    }
}
