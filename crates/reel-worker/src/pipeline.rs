//! Pipeline controller: the facade used by the API and the executor.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use reel_models::{
    BackendId, CompositionState, DurationCheck, PipelineEvent, ProjectId, ResourceError, Scene, SceneChanges,
    SceneId, Script, ScriptId, SubResourceKind, SubResourceState,
};
use reel_queue::{DecomposeScriptJob, QueueJob};

use crate::composition::{self, ComposeOutcome};
use crate::context::PipelineContext;
use crate::decomposition::{self, DurationPolicy};
use crate::error::{WorkerError, WorkerResult};
use crate::orchestrator::{self, enqueue_tracks, load_current_scenes, track_kinds};
use crate::poller;
use crate::reasoning::ProposedScene;
use crate::submission;

/// Request to create a script.
#[derive(Debug, Clone)]
pub struct NewScript {
    pub project_id: ProjectId,
    pub text: String,
    pub requested_duration_secs: f64,
    pub preferred_backends: Vec<BackendId>,
}

/// A script with its current scene versions.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptView {
    pub script: Script,
    pub scenes: Vec<Scene>,
    /// Scenes whose duration could not be corrected automatically.
    pub needs_review: Vec<SceneId>,
}

/// Status of one sub-resource, with a download URL once completed.
#[derive(Debug, Clone, Serialize)]
pub struct SubResourceStatus {
    pub scene_id: SceneId,
    pub kind: SubResourceKind,
    pub state: SubResourceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResourceError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
}

#[derive(Clone)]
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Create a script and queue its decomposition.
    pub async fn create_script(&self, request: NewScript) -> WorkerResult<Script> {
        if request.text.trim().is_empty() {
            return Err(WorkerError::invalid_request("script text is empty"));
        }
        if !request.requested_duration_secs.is_finite() || request.requested_duration_secs <= 0.0 {
            return Err(WorkerError::invalid_request(format!(
                "requested duration must be positive, got {}",
                request.requested_duration_secs
            )));
        }

        let script = Script::new(
            request.project_id,
            request.text,
            request.requested_duration_secs,
            request.preferred_backends,
        );
        self.ctx.store.create_script(&script).await?;

        let job = DecomposeScriptJob::new(script.project_id.clone(), script.id.clone());
        self.ctx.tasks.enqueue(QueueJob::DecomposeScript(job)).await?;
        info!(
            script_id = %script.id,
            project_id = %script.project_id,
            requested_secs = script.requested_duration_secs,
            "Script created, decomposition queued"
        );
        Ok(script)
    }

    pub async fn script_view(&self, project_id: &ProjectId, script_id: &ScriptId) -> WorkerResult<ScriptView> {
        let script = self.script_in_project(project_id, script_id).await?;
        let scenes = load_current_scenes(&self.ctx, &script).await?;
        let needs_review = scenes
            .iter()
            .filter(|s| s.needs_review)
            .map(|s| s.id.clone())
            .collect();
        Ok(ScriptView {
            script,
            scenes,
            needs_review,
        })
    }

    /// Scenes delivered by the inbound decomposition callback.
    pub async fn apply_decomposition_callback(
        &self,
        project_id: &ProjectId,
        script_id: &ScriptId,
        proposed: &[ProposedScene],
    ) -> WorkerResult<Vec<Scene>> {
        let script = self.script_in_project(project_id, script_id).await?;
        decomposition::apply_callback(&self.ctx, &script, proposed).await
    }

    /// Start the video track, and the audio track when the scene needs one.
    pub async fn start_scene_tracks(&self, scene_id: &SceneId) -> WorkerResult<Vec<SubResourceKind>> {
        let scene = self.current_scene(scene_id).await?;
        enqueue_tracks(&self.ctx, &scene, &track_kinds(&scene)).await
    }

    /// Create the next version of a scene and start its tracks. The prior
    /// version is left untouched and frozen.
    pub async fn regenerate_scene(&self, scene_id: &SceneId, changes: SceneChanges) -> WorkerResult<Scene> {
        let parent = self.current_scene(scene_id).await?;
        let mut scene = parent.next_version(changes);

        if !scene.duration_secs.is_finite() || scene.duration_secs <= 0.0 {
            return Err(WorkerError::invalid_request(format!(
                "invalid duration {}",
                scene.duration_secs
            )));
        }
        let policy = DurationPolicy::from_config(&self.ctx.config);
        match scene
            .backend
            .capabilities()
            .durations
            .check(scene.duration_secs, policy.correction_threshold_secs)
        {
            DurationCheck::Valid(_) => {}
            DurationCheck::Corrected { requested, corrected } => {
                info!(scene_id = %parent.id, requested, corrected, "Corrected regenerated scene duration");
                scene.duration_secs = corrected;
            }
            DurationCheck::NeedsReview { requested, nearest } => {
                warn!(scene_id = %parent.id, requested, nearest, "Regenerated scene flagged for review");
                scene.needs_review = true;
            }
        }

        self.ctx.store.insert_scene_version(&scene).await?;
        self.ctx
            .emit(
                &scene.project_id,
                PipelineEvent::SceneRegenerated {
                    script_id: scene.script_id.clone(),
                    scene_id: scene.id.clone(),
                    parent_scene: parent.id.clone(),
                    version: scene.version,
                },
            )
            .await;

        let mut kinds = vec![SubResourceKind::Preview];
        kinds.extend(track_kinds(&scene));
        enqueue_tracks(&self.ctx, &scene, &kinds).await?;

        info!(
            scene_id = %scene.id,
            parent = %parent.id,
            version = scene.version,
            order = scene.order,
            "Scene regenerated"
        );
        Ok(scene)
    }

    pub async fn set_included(&self, scene_id: &SceneId, included: bool) -> WorkerResult<Scene> {
        let scene = self.ctx.store.set_included(scene_id, included).await?;
        info!(scene_id = %scene_id, included, "Scene inclusion updated");
        Ok(scene)
    }

    pub async fn compose(&self, project_id: &ProjectId, script_id: &ScriptId) -> WorkerResult<ComposeOutcome> {
        let script = self.script_in_project(project_id, script_id).await?;
        composition::request_composition(&self.ctx, &script.id).await
    }

    pub async fn sub_resource_status(
        &self,
        scene_id: &SceneId,
        kind: SubResourceKind,
    ) -> WorkerResult<SubResourceStatus> {
        let scene = self.ctx.store.get_scene(scene_id).await?;
        let sub = scene.sub_resource(kind);
        let artifact_url = match (&sub.state, &sub.artifact_key) {
            (SubResourceState::Completed, Some(key)) => Some(self.ctx.storage.presign_get(key).await?),
            _ => None,
        };
        Ok(SubResourceStatus {
            scene_id: scene.id.clone(),
            kind,
            state: sub.state,
            error: sub.error.clone(),
            artifact_url,
        })
    }

    /// Run one queued task.
    pub async fn process_job(&self, job: &QueueJob) -> WorkerResult<()> {
        match job {
            QueueJob::DecomposeScript(j) => decomposition::run_decomposition(&self.ctx, j).await,
            QueueJob::SubmitGeneration(j) => submission::submit_generation(&self.ctx, j).await,
            QueueJob::PollGeneration(j) => poller::poll_generation(&self.ctx, j).await,
            QueueJob::MuxScene(j) => orchestrator::mux_scene(&self.ctx, j).await,
            QueueJob::ComposeScript(j) => composition::run_composition(&self.ctx, j).await,
        }
    }

    /// Record the terminal failure of a task that exhausted its retries.
    pub async fn handle_dead_letter(&self, job: &QueueJob, reason: &str) -> WorkerResult<()> {
        warn!(job_id = %job.job_id(), job_type = job.job_type(), "Dead-lettered: {}", reason);
        match job {
            QueueJob::SubmitGeneration(j) => submission::abandon_submission(&self.ctx, j, reason).await,
            QueueJob::ComposeScript(j) => {
                let script = self.ctx.store.get_script(&j.script_id).await?;
                if script.generation != j.generation || script.composition != CompositionState::Composing {
                    return Ok(());
                }
                composition::fail(
                    &self.ctx,
                    &j.project_id,
                    &j.script_id,
                    j.generation,
                    &WorkerError::job_failed(format!("retries exhausted: {}", reason)),
                )
                .await
            }
            QueueJob::DecomposeScript(j) => {
                let script = self.ctx.store.get_script(&j.script_id).await?;
                decomposition::fail_decomposition(
                    &self.ctx,
                    &script,
                    format!("retries exhausted: {}", reason),
                )
                .await
            }
            QueueJob::PollGeneration(j) => poller::abandon_poll(&self.ctx, j, reason).await,
            QueueJob::MuxScene(j) => orchestrator::abandon_mux(&self.ctx, j, reason).await,
        }
    }

    async fn script_in_project(&self, project_id: &ProjectId, script_id: &ScriptId) -> WorkerResult<Script> {
        let script = self.ctx.store.get_script(script_id).await?;
        if &script.project_id != project_id {
            return Err(reel_store::StoreError::not_found(format!("scripts/{}", script_id)).into());
        }
        Ok(script)
    }

    /// A scene that is still the current version of its slot.
    async fn current_scene(&self, scene_id: &SceneId) -> WorkerResult<Scene> {
        let scene = self.ctx.store.get_scene(scene_id).await?;
        let script = self.ctx.store.get_script(&scene.script_id).await?;
        if !script.is_current(&scene.id) {
            return Err(WorkerError::conflict(format!("scene {} has been superseded", scene.id)));
        }
        Ok(scene)
    }
}
