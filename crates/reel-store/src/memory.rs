//! In-memory record store.
//!
//! Same semantics as the Firestore backend; a single mutex makes every
//! operation atomic. Used by tests and `STORE_BACKEND=memory`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use reel_models::{
    DecompositionStatus, FinalVideo, GenerationJob, ResourceError, Scene, SceneId, Script,
    ScriptId, SubResourceKind, SubResourceUpdate,
};

use crate::error::{StoreError, StoreResult};
use crate::rules;
use crate::store::{CompositionClaim, RecordStore, TransitionOutcome};

#[derive(Default)]
struct Records {
    scripts: HashMap<ScriptId, Script>,
    scenes: HashMap<SceneId, Scene>,
    final_videos: HashMap<String, FinalVideo>,
}

impl Records {
    fn script(&self, id: &ScriptId) -> StoreResult<&Script> {
        self.scripts
            .get(id)
            .ok_or_else(|| StoreError::not_found(format!("scripts/{}", id)))
    }

    /// Mutable scene plus its (shared) script.
    fn scene_and_script(&mut self, id: &SceneId) -> StoreResult<(&mut Scene, &mut Script)> {
        let scene = self
            .scenes
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("scenes/{}", id)))?;
        let script = self
            .scripts
            .get_mut(&scene.script_id)
            .ok_or_else(|| StoreError::not_found(format!("scripts/{}", scene.script_id)))?;
        Ok((scene, script))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Records>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of final-video records for a script.
    pub async fn final_video_count(&self, script_id: &ScriptId) -> usize {
        self.records
            .lock()
            .await
            .final_videos
            .values()
            .filter(|v| &v.script_id == script_id)
            .count()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn create_script(&self, script: &Script) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        if records.scripts.contains_key(&script.id) {
            return Err(StoreError::AlreadyExists(format!("scripts/{}", script.id)));
        }
        records.scripts.insert(script.id.clone(), script.clone());
        Ok(())
    }

    async fn get_script(&self, id: &ScriptId) -> StoreResult<Script> {
        self.records.lock().await.script(id).cloned()
    }

    async fn transition_decomposition(
        &self,
        id: &ScriptId,
        from: DecompositionStatus,
        to: DecompositionStatus,
        error: Option<ResourceError>,
    ) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        let script = records
            .scripts
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("scripts/{}", id)))?;
        Ok(rules::transition_decomposition(script, from, to, error))
    }

    async fn complete_decomposition(&self, id: &ScriptId, scenes: &[Scene]) -> StoreResult<Script> {
        let mut records = self.records.lock().await;
        let mut script = records.script(id)?.clone();
        if let Some(existing) = scenes.iter().find(|s| records.scenes.contains_key(&s.id)) {
            return Err(StoreError::AlreadyExists(format!("scenes/{}", existing.id)));
        }
        rules::complete_decomposition(&mut script, scenes)?;
        for scene in scenes {
            records.scenes.insert(scene.id.clone(), scene.clone());
        }
        records.scripts.insert(id.clone(), script.clone());
        Ok(script)
    }

    async fn get_scene(&self, id: &SceneId) -> StoreResult<Scene> {
        self.records
            .lock()
            .await
            .scenes
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("scenes/{}", id)))
    }

    async fn list_scenes(&self, script_id: &ScriptId) -> StoreResult<Vec<Scene>> {
        let records = self.records.lock().await;
        let mut scenes: Vec<Scene> = records
            .scenes
            .values()
            .filter(|s| &s.script_id == script_id)
            .cloned()
            .collect();
        scenes.sort_by(|a, b| a.order.cmp(&b.order).then(a.version.cmp(&b.version)));
        Ok(scenes)
    }

    async fn insert_scene_version(&self, scene: &Scene) -> StoreResult<Script> {
        let mut records = self.records.lock().await;
        if records.scenes.contains_key(&scene.id) {
            return Err(StoreError::AlreadyExists(format!("scenes/{}", scene.id)));
        }
        let parent_id = scene
            .parent_scene
            .as_ref()
            .ok_or_else(|| StoreError::conflict("new version must reference its parent"))?;
        let parent = records
            .scenes
            .get(parent_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("scenes/{}", parent_id)))?;
        let mut script = records.script(&parent.script_id)?.clone();

        rules::insert_scene_version(&mut script, &parent, scene)?;

        records.scenes.insert(scene.id.clone(), scene.clone());
        records.scripts.insert(script.id.clone(), script.clone());
        Ok(script)
    }

    async fn set_included(&self, scene_id: &SceneId, included: bool) -> StoreResult<Scene> {
        let mut records = self.records.lock().await;
        let (scene, script) = records.scene_and_script(scene_id)?;
        rules::set_included(script, scene, included)?;
        Ok(scene.clone())
    }

    async fn transition_sub_resource(
        &self,
        scene_id: &SceneId,
        kind: SubResourceKind,
        update: &SubResourceUpdate,
    ) -> StoreResult<TransitionOutcome> {
        let mut records = self.records.lock().await;
        let (scene, script) = records.scene_and_script(scene_id)?;
        // Work on a copy so a rejected transition leaves the record untouched.
        let mut draft = scene.clone();
        let outcome = rules::transition_sub_resource(script, &mut draft, kind, update)?;
        if outcome.is_applied() {
            *scene = draft;
        }
        Ok(outcome)
    }

    async fn record_poll(
        &self,
        scene_id: &SceneId,
        kind: SubResourceKind,
    ) -> StoreResult<Option<GenerationJob>> {
        let mut records = self.records.lock().await;
        let (scene, script) = records.scene_and_script(scene_id)?;
        Ok(rules::record_poll(script, scene, kind))
    }

    async fn mark_charged(&self, scene_id: &SceneId, kind: SubResourceKind) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        let (scene, script) = records.scene_and_script(scene_id)?;
        Ok(rules::mark_charged(script, scene, kind))
    }

    async fn claim_composition(
        &self,
        script_id: &ScriptId,
        expected_revision: u64,
        expected_generation: u64,
    ) -> StoreResult<CompositionClaim> {
        let mut records = self.records.lock().await;
        let script = records
            .scripts
            .get_mut(script_id)
            .ok_or_else(|| StoreError::not_found(format!("scripts/{}", script_id)))?;
        Ok(rules::claim_composition(script, expected_revision, expected_generation))
    }

    async fn complete_composition(&self, video: &FinalVideo) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        let id = video.id();
        if records.final_videos.contains_key(&id) {
            return Err(StoreError::AlreadyExists(format!("final_videos/{}", id)));
        }
        let mut script = records.script(&video.script_id)?.clone();
        rules::complete_composition(&mut script, video)?;
        records.final_videos.insert(id, video.clone());
        records.scripts.insert(script.id.clone(), script);
        Ok(())
    }

    async fn fail_composition(
        &self,
        script_id: &ScriptId,
        generation: u64,
        error: ResourceError,
    ) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        let mut script = records.script(script_id)?.clone();
        rules::fail_composition(&mut script, generation, error)?;
        records.scripts.insert(script.id.clone(), script);
        Ok(())
    }

    async fn get_final_video(
        &self,
        script_id: &ScriptId,
        generation: u64,
    ) -> StoreResult<Option<FinalVideo>> {
        Ok(self
            .records
            .lock()
            .await
            .final_videos
            .get(&FinalVideo::record_id(script_id, generation))
            .cloned())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
