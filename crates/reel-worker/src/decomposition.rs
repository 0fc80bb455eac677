//! Script decomposition: one reasoning call, validation, one clarified retry.

use std::str::FromStr;

use tracing::{info, warn};

use reel_models::{
    BackendId, DecompositionStatus, DurationCheck, ErrorKind, PipelineEvent, ResourceError, Scene,
    SceneDraft, Script, SubResourceKind,
};
use reel_queue::DecomposeScriptJob;

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::record_duration_correction;
use crate::orchestrator::enqueue_tracks;
use crate::reasoning::{DecompositionRequest, ProposedScene};

/// Duration rules applied to every decomposition.
#[derive(Debug, Clone, Copy)]
pub struct DurationPolicy {
    /// Allowed relative drift of the total.
    pub tolerance: f64,
    /// Largest snap (seconds) applied without flagging the scene.
    pub correction_threshold_secs: f64,
}

impl DurationPolicy {
    pub fn from_config(config: &crate::config::WorkerConfig) -> Self {
        Self {
            tolerance: config.duration_tolerance,
            correction_threshold_secs: config.correction_threshold_secs,
        }
    }
}

/// A duration that was snapped to the backend's domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationCorrection {
    pub order: u32,
    pub backend: BackendId,
    pub requested: f64,
    pub corrected: f64,
}

/// A duration too far from any valid value; left as requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewFlag {
    pub order: u32,
    pub backend: BackendId,
    pub requested: f64,
    pub nearest: f64,
}

/// Validated decomposition, ready to become scene records.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDecomposition {
    pub drafts: Vec<SceneDraft>,
    pub corrections: Vec<DurationCorrection>,
    pub reviews: Vec<ReviewFlag>,
}

impl ValidatedDecomposition {
    pub fn total_duration(&self) -> f64 {
        self.drafts.iter().map(|d| d.duration_secs).sum()
    }
}

/// Check proposed scenes against the backends' duration domains and the
/// requested total. Returns the rejection reason on failure.
pub fn validate_scenes(
    proposed: &[ProposedScene],
    requested_total: f64,
    policy: DurationPolicy,
) -> Result<ValidatedDecomposition, String> {
    if proposed.is_empty() {
        return Err("no scenes returned".to_string());
    }

    let mut drafts = Vec::with_capacity(proposed.len());
    let mut corrections = Vec::new();
    let mut reviews = Vec::new();

    for (index, scene) in proposed.iter().enumerate() {
        let order = index as u32;
        let backend = BackendId::from_str(&scene.platform)
            .map_err(|_| format!("scene {}: unknown backend '{}'", order, scene.platform))?;

        if scene.narration.trim().is_empty() && scene.visual_directive.trim().is_empty() {
            return Err(format!("scene {}: narration and visual directive are both empty", order));
        }
        if !scene.duration.is_finite() || scene.duration <= 0.0 {
            return Err(format!("scene {}: invalid duration {}", order, scene.duration));
        }

        let domain = backend.capabilities().durations;
        let check = domain.check(scene.duration, policy.correction_threshold_secs);
        let needs_review = match check {
            DurationCheck::Valid(_) => false,
            DurationCheck::Corrected { requested, corrected } => {
                info!(
                    order,
                    backend = %backend,
                    requested,
                    corrected,
                    "Corrected scene duration to backend domain"
                );
                record_duration_correction(backend.as_str(), "corrected");
                corrections.push(DurationCorrection {
                    order,
                    backend,
                    requested,
                    corrected,
                });
                false
            }
            DurationCheck::NeedsReview { requested, nearest } => {
                warn!(
                    order,
                    backend = %backend,
                    requested,
                    nearest,
                    domain = %domain,
                    "Scene duration too far from backend domain, flagging for review"
                );
                record_duration_correction(backend.as_str(), "needs_review");
                reviews.push(ReviewFlag {
                    order,
                    backend,
                    requested,
                    nearest,
                });
                true
            }
        };

        drafts.push(SceneDraft {
            narration: scene.narration.clone(),
            visual_directive: scene.visual_directive.clone(),
            duration_secs: check.duration(),
            backend,
            config: scene.config.clone(),
            needs_review,
        });
    }

    let validated = ValidatedDecomposition {
        drafts,
        corrections,
        reviews,
    };

    let total = validated.total_duration();
    let allowed = requested_total * policy.tolerance;
    if (total - requested_total).abs() > allowed + 1e-9 {
        return Err(format!(
            "total duration {:.1}s is outside {:.0}% of the requested {:.1}s",
            total,
            policy.tolerance * 100.0,
            requested_total
        ));
    }

    Ok(validated)
}

/// Call the reasoning service, retrying once with the rejection reason.
pub async fn decompose_with_retry(
    ctx: &PipelineContext,
    script: &Script,
) -> Result<ValidatedDecomposition, String> {
    let policy = DurationPolicy::from_config(&ctx.config);
    let mut request = DecompositionRequest {
        script_text: script.text.clone(),
        requested_duration_secs: script.requested_duration_secs,
        preferred_backends: script.preferred_backends.clone(),
        clarification: None,
    };

    let mut last_reason = String::new();
    for attempt in 1..=2 {
        let outcome = match ctx.reasoning.decompose(&request).await {
            Ok(proposed) => validate_scenes(&proposed, script.requested_duration_secs, policy),
            Err(e) => Err(e.to_string()),
        };
        match outcome {
            Ok(validated) => return Ok(validated),
            Err(reason) => {
                warn!(script_id = %script.id, attempt, "Decomposition attempt rejected: {}", reason);
                last_reason = reason;
                request.clarification = Some(last_reason.clone());
            }
        }
    }
    Err(last_reason)
}

/// Persist validated scenes and start their preview tracks.
///
/// Shared by the queue task and the inbound decomposition callback. The
/// script must be `processing`.
pub async fn apply_decomposition(
    ctx: &PipelineContext,
    script: &Script,
    validated: ValidatedDecomposition,
) -> WorkerResult<Vec<Scene>> {
    let scenes: Vec<Scene> = validated
        .drafts
        .into_iter()
        .enumerate()
        .map(|(order, draft)| {
            Scene::from_draft(
                script.project_id.clone(),
                script.id.clone(),
                order as u32,
                draft,
            )
        })
        .collect();

    ctx.store.complete_decomposition(&script.id, &scenes).await?;

    for flag in &validated.reviews {
        if let Some(scene) = scenes.get(flag.order as usize) {
            ctx.emit(
                &script.project_id,
                PipelineEvent::ManualReviewRequested {
                    script_id: script.id.clone(),
                    scene_id: scene.id.clone(),
                    requested_secs: flag.requested,
                    nearest_secs: flag.nearest,
                },
            )
            .await;
        }
    }

    ctx.emit(
        &script.project_id,
        PipelineEvent::DecompositionCompleted {
            script_id: script.id.clone(),
            scene_count: scenes.len(),
        },
    )
    .await;

    for scene in &scenes {
        enqueue_tracks(ctx, scene, &[SubResourceKind::Preview]).await?;
    }

    Ok(scenes)
}

/// Mark decomposition failed and notify.
pub(crate) async fn fail_decomposition(ctx: &PipelineContext, script: &Script, reason: String) -> WorkerResult<()> {
    let error = ResourceError::new(ErrorKind::DecompositionError, reason);
    let moved = ctx
        .store
        .transition_decomposition(
            &script.id,
            DecompositionStatus::Processing,
            DecompositionStatus::Failed,
            Some(error.clone()),
        )
        .await?;
    if moved {
        ctx.emit(
            &script.project_id,
            PipelineEvent::DecompositionFailed {
                script_id: script.id.clone(),
                error,
            },
        )
        .await;
    }
    Ok(())
}

/// Queue task: decompose a pending script.
pub async fn run_decomposition(ctx: &PipelineContext, job: &DecomposeScriptJob) -> WorkerResult<()> {
    let logger = JobLogger::from_parts(&job.job_id, "decompose_script");
    let script = ctx.store.get_script(&job.script_id).await?;

    let started = ctx
        .store
        .transition_decomposition(
            &script.id,
            DecompositionStatus::Pending,
            DecompositionStatus::Processing,
            None,
        )
        .await?;
    if !started {
        let current = ctx.store.get_script(&script.id).await?;
        if current.decomposition != DecompositionStatus::Processing {
            logger.log_warning(&format!(
                "script {} decomposition already {}",
                script.id,
                current.decomposition.as_str()
            ));
            return Ok(());
        }
        // Redelivered after a crash mid-call.
        logger.log_progress("resuming decomposition left in processing");
    }

    logger.log_start(&format!(
        "decomposing script {} ({:.1}s requested)",
        script.id, script.requested_duration_secs
    ));

    match decompose_with_retry(ctx, &script).await {
        Ok(validated) => {
            let corrections = validated.corrections.len();
            let reviews = validated.reviews.len();
            let scenes = apply_decomposition(ctx, &script, validated).await?;
            logger.log_completion(&format!(
                "{} scenes ({} corrected, {} flagged for review)",
                scenes.len(),
                corrections,
                reviews
            ));
        }
        Err(reason) => {
            logger.log_error(&format!("decomposition failed twice: {}", reason));
            fail_decomposition(ctx, &script, reason).await?;
        }
    }
    Ok(())
}

/// Validate and apply scenes delivered by the inbound callback. Invalid
/// payloads leave the script untouched.
pub async fn apply_callback(
    ctx: &PipelineContext,
    script: &Script,
    proposed: &[ProposedScene],
) -> WorkerResult<Vec<Scene>> {
    let policy = DurationPolicy::from_config(&ctx.config);
    let validated = validate_scenes(proposed, script.requested_duration_secs, policy)
        .map_err(WorkerError::decomposition_rejected)?;

    if script.decomposition == DecompositionStatus::Pending {
        ctx.store
            .transition_decomposition(
                &script.id,
                DecompositionStatus::Pending,
                DecompositionStatus::Processing,
                None,
            )
            .await?;
    } else if script.decomposition != DecompositionStatus::Processing {
        return Err(WorkerError::conflict(format!(
            "script {} decomposition already {}",
            script.id,
            script.decomposition.as_str()
        )));
    }

    apply_decomposition(ctx, script, validated).await
}
