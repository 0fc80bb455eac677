//! Per-scene track coordination.
//!
//! Preview, video and audio run independently. The only ordering edge is
//! the per-scene mux, which waits for both video and audio.

use std::collections::HashMap;

use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use reel_models::{
    BackendId, ErrorKind, PipelineEvent, ResourceError, Scene, SceneId, Script, SubResourceKind,
    SubResourceState, SubResourceUpdate,
};
use reel_queue::{MuxSceneJob, QueueJob, SubmitGenerationJob};
use reel_storage::{scene_key, StorageError};
use reel_store::TransitionOutcome;

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// The scene needs a separate narration track: it has narration and its
/// backend does not speak inside the video.
pub fn needs_audio(scene: &Scene) -> bool {
    scene.has_narration() && !scene.backend.capabilities().native_speech
}

/// Video and audio must be muxed into the `final` sub-resource before the
/// scene can be concatenated.
pub fn needs_combination(scene: &Scene) -> bool {
    needs_audio(scene)
}

/// Backend that produces `kind` for this scene. Narration falls back to the
/// presenter family when the scene's backend has no audio track, and the
/// preview image to the cinematic family when it renders no stills.
pub fn backend_for(scene: &Scene, kind: SubResourceKind) -> BackendId {
    let capabilities = scene.backend.capabilities();
    match kind {
        SubResourceKind::Audio if !capabilities.supports_audio => BackendId::Presenter,
        SubResourceKind::Preview if !capabilities.supports_kind(SubResourceKind::Preview) => {
            BackendId::Cinematic
        }
        _ => scene.backend,
    }
}

/// Tracks started by "start scene tracks".
pub fn track_kinds(scene: &Scene) -> Vec<SubResourceKind> {
    let mut kinds = vec![SubResourceKind::Video];
    if needs_audio(scene) {
        kinds.push(SubResourceKind::Audio);
    }
    kinds
}

/// Sub-resources that must be `completed` before the scene can be composed.
pub fn required_kinds(scene: &Scene) -> Vec<SubResourceKind> {
    let mut kinds = track_kinds(scene);
    if needs_combination(scene) {
        kinds.push(SubResourceKind::Final);
    }
    kinds
}

/// Mux gate: both inputs done and the output not yet finished.
pub fn mux_ready(scene: &Scene) -> bool {
    needs_combination(scene)
        && scene.video.is_completed()
        && scene.audio.is_completed()
        && !scene.final_cut.state.is_terminal()
}

/// Storage key of the media that goes into the script-level concat.
pub fn composition_input(scene: &Scene) -> Option<&str> {
    let sub = if needs_combination(scene) {
        &scene.final_cut
    } else {
        &scene.video
    };
    sub.artifact_key.as_deref()
}

/// One unmet requirement blocking composition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRequirement {
    pub scene_id: SceneId,
    pub order: u32,
    pub kind: SubResourceKind,
    pub state: SubResourceState,
}

/// Unmet requirements of one scene, in track order.
pub fn pending_requirements(scene: &Scene) -> Vec<PendingRequirement> {
    required_kinds(scene)
        .into_iter()
        .filter(|kind| !scene.sub_resource(*kind).is_completed())
        .map(|kind| PendingRequirement {
            scene_id: scene.id.clone(),
            order: scene.order,
            kind,
            state: scene.state(kind),
        })
        .collect()
}

/// Current scene versions of a script, in order.
pub async fn load_current_scenes(ctx: &PipelineContext, script: &Script) -> WorkerResult<Vec<Scene>> {
    let mut by_id: HashMap<SceneId, Scene> = ctx
        .store
        .list_scenes(&script.id)
        .await?
        .into_iter()
        .map(|scene| (scene.id.clone(), scene))
        .collect();
    script
        .scene_ids
        .iter()
        .map(|id| {
            by_id
                .remove(id)
                .ok_or_else(|| WorkerError::job_failed(format!("scene {} missing from store", id)))
        })
        .collect()
}

/// Enqueue submission for each `pending` kind. Returns the kinds enqueued.
pub async fn enqueue_tracks(
    ctx: &PipelineContext,
    scene: &Scene,
    kinds: &[SubResourceKind],
) -> WorkerResult<Vec<SubResourceKind>> {
    let mut enqueued = Vec::new();
    for kind in kinds {
        if scene.state(*kind) != SubResourceState::Pending {
            debug!(scene_id = %scene.id, kind = %kind, "Track already started, skipping");
            continue;
        }
        let job = SubmitGenerationJob::new(scene.project_id.clone(), scene.id.clone(), *kind);
        if ctx.tasks.enqueue(QueueJob::SubmitGeneration(job)).await?.is_some() {
            enqueued.push(*kind);
        }
    }
    Ok(enqueued)
}

/// Enqueue the mux when the gate is open.
pub async fn maybe_enqueue_mux(ctx: &PipelineContext, scene: &Scene) -> WorkerResult<bool> {
    if !mux_ready(scene) {
        return Ok(false);
    }
    let job = MuxSceneJob::new(scene.project_id.clone(), scene.id.clone());
    Ok(ctx.tasks.enqueue(QueueJob::MuxScene(job)).await?.is_some())
}

/// Run the per-scene video+audio mux into the `final` sub-resource.
pub async fn mux_scene(ctx: &PipelineContext, job: &MuxSceneJob) -> WorkerResult<()> {
    let logger = JobLogger::from_parts(&job.job_id, "mux_scene");
    let scene = ctx.store.get_scene(&job.scene_id).await?;
    let script = ctx.store.get_script(&scene.script_id).await?;

    if !script.is_current(&scene.id) {
        logger.log_warning(&format!("scene {} superseded, skipping mux", scene.id));
        return Ok(());
    }
    if !mux_ready(&scene) {
        debug!(scene_id = %scene.id, "Mux gate closed, skipping");
        return Ok(());
    }

    // A redelivered task finds `final` already processing and finishes it.
    if scene.final_cut.state == SubResourceState::Pending {
        let start = SubResourceUpdate {
            from: SubResourceState::Pending,
            to: SubResourceState::Processing,
            job: None,
            artifact_key: None,
            error: None,
        };
        match ctx
            .store
            .transition_sub_resource(&scene.id, SubResourceKind::Final, &start)
            .await?
        {
            TransitionOutcome::Applied(_) => {}
            other => {
                debug!(scene_id = %scene.id, outcome = ?other, "Mux claimed elsewhere");
                return Ok(());
            }
        }
    }

    logger.log_start(&format!("muxing scene {}", scene.id));
    let key = scene_key(&scene, SubResourceKind::Final);

    let update = match run_mux(ctx, &scene, &key).await {
        Ok(()) => SubResourceUpdate::completed(key.clone()),
        Err(e) if e.is_retryable() => return Err(e),
        Err(e) => {
            logger.log_error(&e.to_string());
            SubResourceUpdate::failed(e.to_resource_error(ErrorKind::CompositionError))
        }
    };

    record_final(ctx, &scene, &update, &logger).await
}

/// Fail the `final` slot of a scene whose mux task was dead-lettered.
pub async fn abandon_mux(ctx: &PipelineContext, job: &MuxSceneJob, reason: &str) -> WorkerResult<()> {
    let logger = JobLogger::from_parts(&job.job_id, "mux_scene");
    let scene = ctx.store.get_scene(&job.scene_id).await?;
    let error = ResourceError::new(ErrorKind::CompositionError, format!("mux retries exhausted: {}", reason));
    let update = match scene.final_cut.state {
        SubResourceState::Processing => SubResourceUpdate::failed(error),
        SubResourceState::Pending if mux_ready(&scene) => SubResourceUpdate::rejected(error),
        _ => return Ok(()),
    };
    logger.log_error(&format!("mux of scene {} abandoned: {}", scene.id, reason));
    record_final(ctx, &scene, &update, &logger).await
}

async fn record_final(
    ctx: &PipelineContext,
    scene: &Scene,
    update: &SubResourceUpdate,
    logger: &JobLogger,
) -> WorkerResult<()> {
    let state = update.to;
    match ctx
        .store
        .transition_sub_resource(&scene.id, SubResourceKind::Final, update)
        .await?
    {
        TransitionOutcome::Applied(_) => {
            crate::metrics::record_terminal(SubResourceKind::Final.as_str(), state.as_str());
            ctx.emit(
                &scene.project_id,
                PipelineEvent::SubResourceChanged {
                    script_id: scene.script_id.clone(),
                    scene_id: scene.id.clone(),
                    kind: SubResourceKind::Final,
                    state,
                    error: update.error.clone(),
                },
            )
            .await;
            logger.log_completion(&format!("final cut {}", state));
        }
        other => info!(scene_id = %scene.id, outcome = ?other, "Mux result not applied"),
    }
    Ok(())
}

async fn run_mux(ctx: &PipelineContext, scene: &Scene, key: &str) -> WorkerResult<()> {
    let (Some(video_key), Some(audio_key)) = (
        scene.video.artifact_key.as_deref(),
        scene.audio.artifact_key.as_deref(),
    ) else {
        return Err(WorkerError::job_failed(
            "completed track has no artifact",
        ));
    };

    tokio::fs::create_dir_all(&ctx.config.work_dir).await?;
    let work = TempDir::new_in(&ctx.config.work_dir)?;
    let video = work.path().join("video.mp4");
    let audio = work.path().join("audio.mp3");
    let output = work.path().join("final.mp4");

    ctx.storage.download_file(video_key, &video).await?;
    ctx.storage.download_file(audio_key, &audio).await?;
    ctx.composer.mux(&video, &audio, &output).await?;

    match ctx
        .storage
        .put_file(key, &output, SubResourceKind::Final.content_type())
        .await
    {
        Ok(()) => Ok(()),
        Err(StorageError::AlreadyExists(_)) => {
            warn!(key, "Final cut already stored by an earlier attempt");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{ProjectId, SceneConfig, SceneDraft, ScriptId};

    fn scene(backend: BackendId, narration: &str) -> Scene {
        Scene::from_draft(
            ProjectId::from("p1"),
            ScriptId::from("s1"),
            0,
            SceneDraft {
                narration: narration.to_string(),
                visual_directive: "shot".to_string(),
                duration_secs: 4.0,
                backend,
                config: SceneConfig::default(),
                needs_review: false,
            },
        )
    }

    #[test]
    fn test_needs_audio_depends_on_native_speech() {
        assert!(needs_audio(&scene(BackendId::Cinematic, "Hello")));
        assert!(!needs_audio(&scene(BackendId::Presenter, "Hello")));
        assert!(!needs_audio(&scene(BackendId::Clip, "   ")));
    }

    #[test]
    fn test_audio_routed_to_presenter() {
        let s = scene(BackendId::Clip, "Hello");
        assert_eq!(backend_for(&s, SubResourceKind::Audio), BackendId::Presenter);
        assert_eq!(backend_for(&s, SubResourceKind::Video), BackendId::Clip);
    }

    #[test]
    fn test_presenter_preview_routed_to_image_backend() {
        let s = scene(BackendId::Presenter, "Hello");
        let preview = backend_for(&s, SubResourceKind::Preview);
        assert_eq!(preview, BackendId::Cinematic);
        assert!(preview.capabilities().supports_kind(SubResourceKind::Preview));
        assert_eq!(backend_for(&s, SubResourceKind::Video), BackendId::Presenter);
        assert_eq!(backend_for(&scene(BackendId::Clip, ""), SubResourceKind::Preview), BackendId::Clip);
    }

    #[test]
    fn test_required_kinds() {
        let cinematic = scene(BackendId::Cinematic, "Hello");
        assert_eq!(
            required_kinds(&cinematic),
            vec![SubResourceKind::Video, SubResourceKind::Audio, SubResourceKind::Final]
        );
        let presenter = scene(BackendId::Presenter, "Hello");
        assert_eq!(required_kinds(&presenter), vec![SubResourceKind::Video]);
    }

    #[test]
    fn test_mux_gate_waits_for_both_tracks() {
        let mut s = scene(BackendId::Cinematic, "Hello");
        assert!(!mux_ready(&s));
        s.video.state = SubResourceState::Completed;
        assert!(!mux_ready(&s));
        s.audio.state = SubResourceState::Completed;
        assert!(mux_ready(&s));
        s.final_cut.state = SubResourceState::Completed;
        assert!(!mux_ready(&s));
    }

    #[test]
    fn test_pending_requirements_and_input() {
        let mut s = scene(BackendId::Clip, "");
        assert_eq!(pending_requirements(&s).len(), 1);
        s.video.state = SubResourceState::Completed;
        s.video.artifact_key = Some("p1/s1/0-x/video.mp4".to_string());
        assert!(pending_requirements(&s).is_empty());
        assert_eq!(composition_input(&s), Some("p1/s1/0-x/video.mp4"));
    }
}
