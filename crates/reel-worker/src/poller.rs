//! Remote job polling, artifact retrieval and credit charging.
//!
//! The terminal transition is recorded first. Charging, releasing and the
//! mux hand-off come after it and are repeatable, so a redelivered poll
//! that finds the sub-resource already terminal finishes them.

use chrono::Utc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use reel_models::{
    ErrorKind, PipelineEvent, ResourceError, Scene, SubResourceKind,
    SubResourceState, SubResourceUpdate,
};
use reel_providers::{fetch_to_file, GenerationAdapter, PollStatus, ProviderError};
use reel_queue::{PollGenerationJob, QueueJob};
use reel_storage::{scene_key, StorageError};
use reel_store::TransitionOutcome;

use crate::context::PipelineContext;
use crate::credits::CreditReservation;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::orchestrator::{backend_for, maybe_enqueue_mux};

/// What a single poll decided.
#[derive(Debug)]
enum PollDecision {
    /// Still running; poll again later.
    Again,
    /// Terminal transition to apply.
    Finish(SubResourceUpdate),
}

/// Queue task: check one remote job once and reschedule or finish it.
pub async fn poll_generation(ctx: &PipelineContext, job: &PollGenerationJob) -> WorkerResult<()> {
    let logger = JobLogger::from_parts(&job.job_id, "poll_generation");

    let Some(generation) = ctx.store.record_poll(&job.scene_id, job.kind).await? else {
        return resume_settlement(ctx, job).await;
    };

    let age = generation.age_secs(Utc::now());
    if age > ctx.config.max_poll_duration.as_secs() as i64 {
        logger.log_error(&format!("{} job {} exceeded polling window ({}s)", job.kind, generation.handle, age));
        let update = SubResourceUpdate::failed(ResourceError::new(
            ErrorKind::TransientProviderError,
            format!("generation timed out after {}s", age),
        ));
        return finish(ctx, job, generation.attempts, update, &logger).await;
    }

    let adapter = match ctx.adapters.get(generation.backend) {
        Ok(adapter) => adapter,
        Err(e) => {
            let update = SubResourceUpdate::failed(ResourceError::new(e.kind(), e.to_string()));
            return finish(ctx, job, generation.attempts, update, &logger).await;
        }
    };

    let decision = match adapter.poll(&generation.handle).await {
        Ok(status) => {
            metrics::record_poll(generation.backend.as_str(), job.kind.as_str(), status.as_str());
            match status {
                PollStatus::Pending | PollStatus::Processing => PollDecision::Again,
                PollStatus::Failed { message } => PollDecision::Finish(SubResourceUpdate::failed(
                    ResourceError::new(ErrorKind::ProviderRejection, message),
                )),
                PollStatus::Completed { locator } => {
                    let scene = ctx.store.get_scene(&job.scene_id).await?;
                    retrieve(ctx, adapter.as_ref(), &scene, job.kind, &locator).await?
                }
            }
        }
        Err(e) if e.is_retryable() => {
            metrics::record_poll(generation.backend.as_str(), job.kind.as_str(), "transient");
            logger.log_warning(&format!("poll failed transiently: {}", e));
            PollDecision::Again
        }
        Err(e) => {
            metrics::record_poll(generation.backend.as_str(), job.kind.as_str(), "rejected");
            PollDecision::Finish(SubResourceUpdate::failed(ResourceError::new(
                e.kind(),
                e.to_string(),
            )))
        }
    };

    match decision {
        PollDecision::Again => {
            ctx.tasks
                .enqueue_after(QueueJob::PollGeneration(job.next()), ctx.config.poll_interval)
                .await?;
            Ok(())
        }
        PollDecision::Finish(update) => finish(ctx, job, generation.attempts, update, &logger).await,
    }
}

/// Download the finished artifact and store it under the scene's key.
/// Storage failures are returned so the poll task is retried.
async fn retrieve(
    ctx: &PipelineContext,
    adapter: &dyn GenerationAdapter,
    scene: &Scene,
    kind: SubResourceKind,
    locator: &str,
) -> WorkerResult<PollDecision> {
    tokio::fs::create_dir_all(&ctx.config.work_dir).await?;
    let work = TempDir::new_in(&ctx.config.work_dir)?;
    let path = work.path().join(format!("{}.{}", kind, kind.extension()));

    let bytes = match fetch_to_file(adapter, locator, &path, &ctx.fetch_retry).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Ok(PollDecision::Finish(SubResourceUpdate::failed(fetch_error(&e))));
        }
    };

    let key = scene_key(scene, kind);
    match ctx.storage.put_file(&key, &path, kind.content_type()).await {
        Ok(()) => {}
        Err(StorageError::AlreadyExists(_)) => {
            warn!(key = %key, "Artifact already stored by an earlier attempt");
        }
        Err(e) => return Err(e.into()),
    }
    info!(scene_id = %scene.id, kind = %kind, bytes, key = %key, "Artifact stored");
    Ok(PollDecision::Finish(SubResourceUpdate::completed(key)))
}

fn fetch_error(e: &ProviderError) -> ResourceError {
    let kind = if e.is_retryable() {
        ErrorKind::TransientProviderError
    } else {
        ErrorKind::ProviderRejection
    };
    ResourceError::new(kind, format!("artifact download failed: {}", e))
}

/// Apply the terminal transition, notify, then settle credits.
async fn finish(
    ctx: &PipelineContext,
    job: &PollGenerationJob,
    attempts: u32,
    update: SubResourceUpdate,
    logger: &JobLogger,
) -> WorkerResult<()> {
    let state = update.to;
    let error = update.error.clone();

    let scene = match ctx
        .store
        .transition_sub_resource(&job.scene_id, job.kind, &update)
        .await?
    {
        TransitionOutcome::Applied(scene) => scene,
        TransitionOutcome::Superseded => {
            logger.log_warning(&format!(
                "scene {} superseded, late {} result ignored and not charged",
                job.scene_id, job.kind
            ));
            return Ok(());
        }
        TransitionOutcome::Stale { current } => {
            debug!(scene_id = %job.scene_id, kind = %job.kind, current = %current, "Result already recorded");
            return Ok(());
        }
    };

    metrics::record_terminal(job.kind.as_str(), state.as_str());
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
    logger.log_completion(&format!("{} {} after {} polls", job.kind, state, attempts));

    settle(ctx, &scene, job.kind).await
}

/// Poll for a sub-resource that is no longer `processing`. When it is
/// terminal, repeat the settlement an earlier delivery may not have finished.
async fn resume_settlement(ctx: &PipelineContext, job: &PollGenerationJob) -> WorkerResult<()> {
    let scene = ctx.store.get_scene(&job.scene_id).await?;
    let state = scene.state(job.kind);
    if !state.is_terminal() {
        debug!(
            scene_id = %job.scene_id,
            kind = %job.kind,
            state = %state,
            "Sub-resource not processing or scene superseded, dropping poll"
        );
        return Ok(());
    }
    debug!(scene_id = %job.scene_id, kind = %job.kind, state = %state, "Settling already terminal sub-resource");
    settle(ctx, &scene, job.kind).await
}

/// Charge a completed track or release a failed one, then open the mux
/// gate. The ledger charge is keyed by [`CreditReservation::key`] and lands
/// before the `charged` flag is set.
async fn settle(ctx: &PipelineContext, scene: &Scene, kind: SubResourceKind) -> WorkerResult<()> {
    let backend = backend_for(scene, kind);
    let reservation = CreditReservation::for_sub_resource(&scene.project_id, &scene.id, kind, backend);

    match scene.state(kind) {
        SubResourceState::Completed => {
            if !scene.sub_resource(kind).charged {
                ctx.credits.charge(&reservation).await?;
                if ctx.store.mark_charged(&scene.id, kind).await? {
                    metrics::record_credits(backend.as_str(), kind.as_str(), reservation.cost);
                }
            }
            maybe_enqueue_mux(ctx, scene).await?;
        }
        SubResourceState::Error => ctx.credits.release(&reservation).await?,
        SubResourceState::Pending | SubResourceState::Processing => {}
    }
    Ok(())
}

/// Fail a sub-resource whose poll task was dead-lettered. Nothing else
/// would poll it again, so it would otherwise stay `processing`.
pub async fn abandon_poll(ctx: &PipelineContext, job: &PollGenerationJob, reason: &str) -> WorkerResult<()> {
    let logger = JobLogger::from_parts(&job.job_id, "poll_generation");
    let scene = ctx.store.get_scene(&job.scene_id).await?;
    let sub = scene.sub_resource(job.kind);

    if sub.state.is_terminal() {
        return settle(ctx, &scene, job.kind).await;
    }
    if sub.state != SubResourceState::Processing {
        return Ok(());
    }

    logger.log_error(&format!("{} polling abandoned: {}", job.kind, reason));
    let attempts = sub.job.as_ref().map(|j| j.attempts).unwrap_or_default();
    let update = SubResourceUpdate::failed(ResourceError::new(
        ErrorKind::TransientProviderError,
        format!("polling retries exhausted: {}", reason),
    ));
    finish(ctx, job, attempts, update, &logger).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        let transient = fetch_error(&ProviderError::transient("reset"));
        assert_eq!(transient.kind, ErrorKind::TransientProviderError);
        let gone = fetch_error(&ProviderError::rejected(404, "expired"));
        assert_eq!(gone.kind, ErrorKind::ProviderRejection);
        assert!(gone.message.contains("expired"));
    }
}
