//! Script-level composition: readiness gate, claim, concat and publish.

use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use reel_models::{
    CompositionState, DecompositionStatus, ErrorKind, FinalVideo, PipelineEvent, ProjectId, Scene,
    ScriptId, SubResourceKind,
};
use reel_queue::{ComposeScriptJob, QueueJob};
use reel_storage::{final_video_key, StorageError};
use reel_store::CompositionClaim;

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::record_composition;
use crate::orchestrator::{composition_input, load_current_scenes, pending_requirements, PendingRequirement};

const CLAIM_ATTEMPTS: usize = 3;

/// Answer to a compose request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComposeOutcome {
    /// A new generation was claimed and queued.
    Started { generation: u64 },
    /// Included scenes still have unfinished sub-resources. Nothing changed.
    NotReady { pending: Vec<PendingRequirement> },
    /// A composition is already running.
    InFlight { generation: u64 },
    /// The current final video already reflects the included scenes.
    AlreadyComposed { generation: u64 },
}

/// Included current scenes, in order.
pub fn included(scenes: &[Scene]) -> Vec<&Scene> {
    scenes.iter().filter(|s| s.is_included).collect()
}

/// Check readiness and claim the next generation.
pub async fn request_composition(ctx: &PipelineContext, script_id: &ScriptId) -> WorkerResult<ComposeOutcome> {
    for _ in 0..CLAIM_ATTEMPTS {
        let script = ctx.store.get_script(script_id).await?;
        if script.decomposition != DecompositionStatus::Completed {
            return Err(WorkerError::invalid_request(format!(
                "script {} decomposition is {}",
                script.id,
                script.decomposition.as_str()
            )));
        }

        let scenes = load_current_scenes(ctx, &script).await?;
        let chosen = included(&scenes);
        if chosen.is_empty() {
            return Err(WorkerError::invalid_request("no scenes are included"));
        }

        let pending: Vec<PendingRequirement> =
            chosen.iter().flat_map(|s| pending_requirements(s)).collect();
        if !pending.is_empty() {
            return Ok(ComposeOutcome::NotReady { pending });
        }

        match script.composition {
            CompositionState::Composing => {
                return Ok(ComposeOutcome::InFlight {
                    generation: script.generation,
                })
            }
            CompositionState::Completed => {
                if let Some(existing) = ctx.store.get_final_video(&script.id, script.generation).await? {
                    let ids: Vec<_> = chosen.iter().map(|s| s.id.clone()).collect();
                    if existing.scene_ids == ids {
                        return Ok(ComposeOutcome::AlreadyComposed {
                            generation: script.generation,
                        });
                    }
                }
            }
            CompositionState::Idle | CompositionState::Error => {}
        }

        match ctx
            .store
            .claim_composition(&script.id, script.revision, script.generation)
            .await?
        {
            CompositionClaim::Claimed { generation } => {
                info!(script_id = %script.id, generation, scenes = chosen.len(), "Composition claimed");
                ctx.emit(
                    &script.project_id,
                    PipelineEvent::CompositionStarted {
                        script_id: script.id.clone(),
                        generation,
                    },
                )
                .await;

                let scene_ids = chosen.iter().map(|s| s.id.clone()).collect();
                let job = ComposeScriptJob::new(script.project_id.clone(), script.id.clone(), generation, scene_ids);
                if let Err(e) = ctx.tasks.enqueue(QueueJob::ComposeScript(job)).await {
                    let error = WorkerError::from(e);
                    ctx.store
                        .fail_composition(&script.id, generation, error.to_resource_error(ErrorKind::CompositionError))
                        .await?;
                    return Err(error);
                }
                return Ok(ComposeOutcome::Started { generation });
            }
            CompositionClaim::InFlight { generation } => return Ok(ComposeOutcome::InFlight { generation }),
            CompositionClaim::AlreadyComposed { generation } => {
                return Ok(ComposeOutcome::AlreadyComposed { generation })
            }
            CompositionClaim::Stale => {
                info!(script_id = %script.id, "Script changed during compose request, re-evaluating");
            }
        }
    }
    Err(WorkerError::conflict(format!(
        "script {} kept changing during compose request",
        script_id
    )))
}

/// Scene versions recorded on the claim, in claim order. Later
/// regenerations or inclusion changes do not alter a claimed generation.
async fn load_claimed_scenes(ctx: &PipelineContext, job: &ComposeScriptJob) -> WorkerResult<Vec<Scene>> {
    if job.scene_ids.is_empty() {
        return Err(WorkerError::job_failed(format!(
            "generation {} was claimed without scenes",
            job.generation
        )));
    }
    let mut scenes = Vec::with_capacity(job.scene_ids.len());
    for id in &job.scene_ids {
        scenes.push(ctx.store.get_scene(id).await?);
    }
    Ok(scenes)
}

/// Queue task: concatenate the scenes claimed for a generation.
pub async fn run_composition(ctx: &PipelineContext, job: &ComposeScriptJob) -> WorkerResult<()> {
    let logger = JobLogger::from_parts(&job.job_id, "compose_script");
    let script = ctx.store.get_script(&job.script_id).await?;
    if script.composition != CompositionState::Composing || script.generation != job.generation {
        logger.log_warning(&format!(
            "script {} is {} at generation {}, skipping generation {}",
            script.id,
            script.composition.as_str(),
            script.generation,
            job.generation
        ));
        return Ok(());
    }

    let started = Instant::now();
    let scenes = match load_claimed_scenes(ctx, job).await {
        Ok(scenes) => scenes,
        Err(e) if is_infrastructure(&e) => return Err(e),
        Err(e) => {
            logger.log_error(&e.to_string());
            return fail(ctx, &script.project_id, &script.id, job.generation, &e).await;
        }
    };
    let chosen: Vec<&Scene> = scenes.iter().collect();
    logger.log_start(&format!("composing {} scenes, generation {}", chosen.len(), job.generation));

    match compose(ctx, job, &chosen).await {
        Ok(video) => {
            ctx.store.complete_composition(&video).await?;
            record_composition("completed", Some(video.lossless), started.elapsed());
            ctx.emit(
                &script.project_id,
                PipelineEvent::CompositionCompleted {
                    script_id: script.id.clone(),
                    generation: video.generation,
                    storage_key: video.storage_key.clone(),
                },
            )
            .await;
            logger.log_completion(&format!(
                "{} ({:.1}s, {})",
                video.storage_key,
                video.duration_secs,
                if video.lossless { "stream copy" } else { "re-encoded" }
            ));
            Ok(())
        }
        Err(e) if is_infrastructure(&e) => {
            logger.log_warning(&format!("composition interrupted, will retry: {}", e));
            Err(e)
        }
        Err(e) => {
            logger.log_error(&e.to_string());
            record_composition("failed", None, started.elapsed());
            fail(ctx, &script.project_id, &script.id, job.generation, &e).await
        }
    }
}

/// Move a claimed generation to `error` and notify.
pub async fn fail(
    ctx: &PipelineContext,
    project_id: &ProjectId,
    script_id: &ScriptId,
    generation: u64,
    cause: &WorkerError,
) -> WorkerResult<()> {
    let error = cause.to_resource_error(ErrorKind::CompositionError);
    ctx.store
        .fail_composition(script_id, generation, error.clone())
        .await?;
    ctx.emit(
        project_id,
        PipelineEvent::CompositionFailed {
            script_id: script_id.clone(),
            generation,
            error,
        },
    )
    .await;
    Ok(())
}

/// Failures of our own infrastructure, as opposed to bad media.
fn is_infrastructure(e: &WorkerError) -> bool {
    matches!(e, WorkerError::Store(_) | WorkerError::Storage(_) | WorkerError::Io(_)) && e.is_retryable()
}

async fn compose(ctx: &PipelineContext, job: &ComposeScriptJob, scenes: &[&Scene]) -> WorkerResult<FinalVideo> {
    let keys: Vec<&str> = scenes
        .iter()
        .map(|s| {
            composition_input(s)
                .ok_or_else(|| WorkerError::job_failed(format!("scene {} has no composable artifact", s.id)))
        })
        .collect::<WorkerResult<_>>()?;

    tokio::fs::create_dir_all(&ctx.config.work_dir).await?;
    let work = TempDir::new_in(&ctx.config.work_dir)?;

    let mut inputs: Vec<PathBuf> = Vec::with_capacity(keys.len());
    for (index, key) in keys.iter().enumerate() {
        let path = work.path().join(format!("scene-{:03}.mp4", index));
        ctx.storage.download_file(key, &path).await?;
        inputs.push(path);
    }

    let output = work.path().join("final.mp4");
    let composed = tokio::time::timeout(
        ctx.config.compose_timeout,
        ctx.composer.concat(&inputs, &output, work.path()),
    )
    .await
    .map_err(|_| WorkerError::job_failed(format!("concat exceeded {:?}", ctx.config.compose_timeout)))??;

    let storage_key = final_video_key(&job.project_id, &job.script_id, job.generation);
    match ctx
        .storage
        .put_file(&storage_key, &output, SubResourceKind::Final.content_type())
        .await
    {
        Ok(()) => {}
        Err(StorageError::AlreadyExists(_)) => {
            warn!(key = %storage_key, "Final video already stored by an earlier attempt");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(FinalVideo {
        script_id: job.script_id.clone(),
        project_id: job.project_id.clone(),
        generation: job.generation,
        storage_key,
        duration_secs: composed.duration_secs,
        scene_ids: scenes.iter().map(|s| s.id.clone()).collect(),
        lossless: composed.lossless,
        created_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ComposeOutcome::Started { generation: 2 }).unwrap();
        assert_eq!(json["status"], "started");
        assert_eq!(json["generation"], 2);
    }

    #[test]
    fn test_infrastructure_errors_are_retried() {
        let io = WorkerError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(is_infrastructure(&io));
        assert!(!is_infrastructure(&WorkerError::job_failed("bad input")));
    }
}
