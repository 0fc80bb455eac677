//! The record store contract.
//!
//! All coordination between workers goes through these conditional updates.
//! Each method is atomic with respect to the records it touches.

use async_trait::async_trait;
use reel_models::{
    DecompositionStatus, FinalVideo, GenerationJob, ResourceError, Scene, SceneId, Script,
    ScriptId, SubResourceKind, SubResourceState, SubResourceUpdate,
};

use crate::error::StoreResult;

/// Result of a conditional sub-resource update.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The update was applied; the scene as written.
    Applied(Scene),
    /// The sub-resource was no longer in the expected state.
    Stale { current: SubResourceState },
    /// The scene has a newer version and is frozen.
    Superseded,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Result of trying to claim a script's final-artifact slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionClaim {
    /// This caller owns `generation` and must run the composition.
    Claimed { generation: u64 },
    /// Another caller is composing `generation`.
    InFlight { generation: u64 },
    /// Another caller already composed since this caller's read.
    AlreadyComposed { generation: u64 },
    /// Scenes or generation changed since the caller's read; re-evaluate.
    Stale,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_script(&self, script: &Script) -> StoreResult<()>;

    async fn get_script(&self, id: &ScriptId) -> StoreResult<Script>;

    /// Move decomposition `from → to`. Returns false if the status was not
    /// `from`. Entering `processing` increments the attempt counter.
    async fn transition_decomposition(
        &self,
        id: &ScriptId,
        from: DecompositionStatus,
        to: DecompositionStatus,
        error: Option<ResourceError>,
    ) -> StoreResult<bool>;

    /// Complete decomposition and bulk-insert the first scene versions.
    async fn complete_decomposition(&self, id: &ScriptId, scenes: &[Scene]) -> StoreResult<Script>;

    async fn get_scene(&self, id: &SceneId) -> StoreResult<Scene>;

    /// Every scene version recorded for a script.
    async fn list_scenes(&self, script_id: &ScriptId) -> StoreResult<Vec<Scene>>;

    /// Insert a new version of a scene. The parent must be current; it is
    /// not modified.
    async fn insert_scene_version(&self, scene: &Scene) -> StoreResult<Script>;

    async fn set_included(&self, scene_id: &SceneId, included: bool) -> StoreResult<Scene>;

    async fn transition_sub_resource(
        &self,
        scene_id: &SceneId,
        kind: SubResourceKind,
        update: &SubResourceUpdate,
    ) -> StoreResult<TransitionOutcome>;

    /// Stamp a poll on a processing job. `None` when the sub-resource is no
    /// longer processing or the scene is superseded.
    async fn record_poll(
        &self,
        scene_id: &SceneId,
        kind: SubResourceKind,
    ) -> StoreResult<Option<GenerationJob>>;

    /// Set the charged flag. True only for the call that set it.
    async fn mark_charged(&self, scene_id: &SceneId, kind: SubResourceKind) -> StoreResult<bool>;

    async fn claim_composition(
        &self,
        script_id: &ScriptId,
        expected_revision: u64,
        expected_generation: u64,
    ) -> StoreResult<CompositionClaim>;

    /// Create the final-video record and point the script at it.
    async fn complete_composition(&self, video: &FinalVideo) -> StoreResult<()>;

    async fn fail_composition(
        &self,
        script_id: &ScriptId,
        generation: u64,
        error: ResourceError,
    ) -> StoreResult<()>;

    async fn get_final_video(
        &self,
        script_id: &ScriptId,
        generation: u64,
    ) -> StoreResult<Option<FinalVideo>>;

    async fn health_check(&self) -> StoreResult<()>;
}
