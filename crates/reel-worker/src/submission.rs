//! Job submission for one sub-resource.

use tracing::{debug, info};

use reel_models::{
    ErrorKind, GenerationJob, GenerationSpec, PipelineEvent, ResourceError, Scene, SubResourceKind,
    SubResourceState, SubResourceUpdate,
};
use reel_providers::ProviderError;
use reel_queue::{PollGenerationJob, QueueJob, SubmitGenerationJob};
use reel_store::TransitionOutcome;

use crate::context::PipelineContext;
use crate::credits::CreditReservation;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::orchestrator::backend_for;

/// Provider-agnostic request for one sub-resource of a scene.
pub fn build_spec(scene: &Scene, kind: SubResourceKind) -> GenerationSpec {
    let backend = backend_for(scene, kind);
    let narration = scene.has_narration().then(|| scene.narration.clone());
    let with_audio = kind == SubResourceKind::Video
        && (scene.config.with_audio
            || (scene.has_narration() && backend.capabilities().native_speech));
    let reference_images = if kind == SubResourceKind::Audio {
        Vec::new()
    } else {
        scene.config.reference_images.clone()
    };

    GenerationSpec {
        kind,
        prompt: scene.visual_directive.clone(),
        narration,
        duration_secs: scene.duration_secs,
        aspect_ratio: scene.config.aspect_ratio,
        reference_images,
        voice: scene.config.voice.clone(),
        with_audio,
        extra: scene.config.extra.clone(),
    }
}

/// Queue task: start the remote job for one sub-resource.
///
/// Transient failures are returned so the queue retries them; the
/// sub-resource stays `pending` until then. Permanent failures move it to
/// `error` straight from `pending`.
pub async fn submit_generation(ctx: &PipelineContext, job: &SubmitGenerationJob) -> WorkerResult<()> {
    let logger = JobLogger::from_parts(&job.job_id, "submit_generation");
    let scene = ctx.store.get_scene(&job.scene_id).await?;
    let script = ctx.store.get_script(&scene.script_id).await?;

    if !script.is_current(&scene.id) {
        logger.log_warning(&format!("scene {} superseded, not submitting {}", scene.id, job.kind));
        return Ok(());
    }
    if scene.state(job.kind) != SubResourceState::Pending {
        debug!(scene_id = %scene.id, kind = %job.kind, state = %scene.state(job.kind), "Already submitted");
        return Ok(());
    }

    let backend = backend_for(&scene, job.kind);
    let reservation = CreditReservation::for_sub_resource(&scene.project_id, &scene.id, job.kind, backend);
    logger.log_start(&format!("submitting {} for scene {} to {}", job.kind, scene.id, backend));

    let spec = build_spec(&scene, job.kind);
    let submitted = match backend.capabilities().validate(&spec) {
        Err(violation) => Err(ProviderError::from(violation)),
        Ok(()) => match ctx.adapters.get(backend) {
            Ok(adapter) => {
                ctx.credits.reserve(&reservation).await?;
                adapter.submit(&spec).await
            }
            Err(e) => Err(e),
        },
    };

    let update = match submitted {
        Ok(handle) => SubResourceUpdate::submitted(GenerationJob::new(backend, handle)),
        Err(e) if e.is_retryable() => {
            logger.log_warning(&format!("transient submit failure: {}", e));
            ctx.credits.release(&reservation).await?;
            return Err(e.into());
        }
        Err(e) => {
            logger.log_error(&format!("submit rejected: {}", e));
            if !matches!(
                e,
                ProviderError::NotConfigured(_) | ProviderError::UnsupportedConfiguration(_)
            ) {
                ctx.credits.release(&reservation).await?;
            }
            SubResourceUpdate::rejected(ResourceError::new(e.kind(), e.to_string()))
        }
    };

    apply_submission(ctx, &scene, job, update, &reservation, &logger).await
}

async fn apply_submission(
    ctx: &PipelineContext,
    scene: &Scene,
    job: &SubmitGenerationJob,
    update: SubResourceUpdate,
    reservation: &CreditReservation,
    logger: &JobLogger,
) -> WorkerResult<()> {
    let state = update.to;
    let error = update.error.clone();

    match ctx
        .store
        .transition_sub_resource(&scene.id, job.kind, &update)
        .await?
    {
        TransitionOutcome::Applied(_) => {}
        other => {
            // A concurrent submit won; the remote job started here is orphaned.
            logger.log_warning(&format!("submission not recorded: {:?}", other));
            if state == SubResourceState::Processing {
                ctx.credits.release(reservation).await?;
            }
            return Ok(());
        }
    }

    if state.is_terminal() {
        crate::metrics::record_terminal(job.kind.as_str(), state.as_str());
    }
    ctx.emit(
        &scene.project_id,
        PipelineEvent::SubResourceChanged {
            script_id: scene.script_id.clone(),
            scene_id: scene.id.clone(),
            kind: job.kind,
            state,
            error,
        },
    )
    .await;

    if state == SubResourceState::Processing {
        let poll = PollGenerationJob::new(scene.project_id.clone(), scene.id.clone(), job.kind);
        ctx.tasks
            .enqueue_after(QueueJob::PollGeneration(poll), ctx.config.poll_interval)
            .await?;
        logger.log_completion(&format!("{} submitted, polling scheduled", job.kind));
    } else {
        logger.log_completion(&format!("{} rejected", job.kind));
    }
    Ok(())
}

/// Mark a sub-resource whose submit exhausted its queue retries.
pub async fn abandon_submission(ctx: &PipelineContext, job: &SubmitGenerationJob, reason: &str) -> WorkerResult<()> {
    let scene = ctx.store.get_scene(&job.scene_id).await?;
    let update = SubResourceUpdate::rejected(ResourceError::new(
        ErrorKind::TransientProviderError,
        format!("submission retries exhausted: {}", reason),
    ));
    let error = update.error.clone();
    if let TransitionOutcome::Applied(_) = ctx
        .store
        .transition_sub_resource(&scene.id, job.kind, &update)
        .await?
    {
        info!(scene_id = %scene.id, kind = %job.kind, "Sub-resource failed after exhausting submit retries");
        crate::metrics::record_terminal(job.kind.as_str(), SubResourceState::Error.as_str());
        ctx.emit(
            &scene.project_id,
            PipelineEvent::SubResourceChanged {
                script_id: scene.script_id.clone(),
                scene_id: scene.id.clone(),
                kind: job.kind,
                state: SubResourceState::Error,
                error,
            },
        )
        .await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{BackendId, ProjectId, SceneConfig, SceneDraft, ScriptId};

    fn scene(backend: BackendId, narration: &str, images: usize) -> Scene {
        Scene::from_draft(
            ProjectId::new(),
            ScriptId::new(),
            0,
            SceneDraft {
                narration: narration.to_string(),
                visual_directive: "A lighthouse at dusk".to_string(),
                duration_secs: 8.0,
                backend,
                config: SceneConfig {
                    reference_images: (0..images).map(|i| format!("ref-{}.png", i)).collect(),
                    ..Default::default()
                },
                needs_review: false,
            },
        )
    }

    #[test]
    fn test_presenter_video_carries_speech() {
        let spec = build_spec(&scene(BackendId::Presenter, "Hello", 0), SubResourceKind::Video);
        assert!(spec.with_audio);
        assert_eq!(spec.narration.as_deref(), Some("Hello"));
        assert!(BackendId::Presenter.capabilities().validate(&spec).is_ok());
    }

    #[test]
    fn test_cinematic_video_is_silent() {
        let spec = build_spec(&scene(BackendId::Cinematic, "Hello", 2), SubResourceKind::Video);
        assert!(!spec.with_audio);
        assert_eq!(spec.prompt, "A lighthouse at dusk");
        assert!(BackendId::Cinematic.capabilities().validate(&spec).is_ok());
    }

    #[test]
    fn test_routed_audio_drops_reference_images() {
        let s = scene(BackendId::Cinematic, "Hello", 2);
        let spec = build_spec(&s, SubResourceKind::Audio);
        assert!(spec.reference_images.is_empty());
        assert!(backend_for(&s, SubResourceKind::Audio)
            .capabilities()
            .validate(&spec)
            .is_ok());
    }
}
