//! Record mutation rules shared by every store backend.
//!
//! Each function validates and applies one logical change to in-memory
//! copies of the records. Backends load the records, call the rule, and
//! persist the result atomically.

use chrono::Utc;
use reel_models::{
    orders_are_dense, CompositionState, DecompositionStatus, FinalVideo, FinalVideoRef,
    GenerationJob, ResourceError, Scene, Script, SubResourceKind, SubResourceState,
    SubResourceUpdate,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{CompositionClaim, TransitionOutcome};

pub(crate) fn is_superseded(script: &Script, scene: &Scene) -> bool {
    !script.is_current(&scene.id)
}

fn touch(script: &mut Script) {
    script.updated_at = Utc::now();
}

pub(crate) fn transition_decomposition(
    script: &mut Script,
    from: DecompositionStatus,
    to: DecompositionStatus,
    error: Option<ResourceError>,
) -> bool {
    if script.decomposition != from {
        return false;
    }
    script.decomposition = to;
    if to == DecompositionStatus::Processing {
        script.decomposition_attempts += 1;
    }
    if error.is_some() {
        script.decomposition_error = error;
    }
    touch(script);
    true
}

pub(crate) fn complete_decomposition(script: &mut Script, scenes: &[Scene]) -> StoreResult<()> {
    if script.decomposition != DecompositionStatus::Processing {
        return Err(StoreError::conflict(format!(
            "script {} decomposition is {}, expected processing",
            script.id,
            script.decomposition.as_str()
        )));
    }
    if scenes.is_empty() {
        return Err(StoreError::conflict("decomposition produced no scenes"));
    }
    if let Some(foreign) = scenes.iter().find(|s| s.script_id != script.id) {
        return Err(StoreError::conflict(format!(
            "scene {} belongs to script {}",
            foreign.id, foreign.script_id
        )));
    }
    let refs: Vec<&Scene> = scenes.iter().collect();
    if !orders_are_dense(&refs) {
        return Err(StoreError::conflict("scene orders must be unique and contiguous from 0"));
    }

    let mut ordered = refs;
    ordered.sort_by_key(|s| s.order);
    script.scene_ids = ordered.iter().map(|s| s.id.clone()).collect();
    script.decomposition = DecompositionStatus::Completed;
    script.decomposition_error = None;
    script.revision += 1;
    touch(script);
    Ok(())
}

pub(crate) fn insert_scene_version(script: &mut Script, parent: &Scene, scene: &Scene) -> StoreResult<()> {
    if scene.parent_scene.as_ref() != Some(&parent.id) {
        return Err(StoreError::conflict("new version must reference its parent"));
    }
    if scene.version != parent.version + 1 || scene.order != parent.order {
        return Err(StoreError::conflict(format!(
            "version {} at order {} does not follow {} at order {}",
            scene.version, scene.order, parent.version, parent.order
        )));
    }
    let slot = script
        .scene_ids
        .get_mut(parent.order as usize)
        .filter(|id| **id == parent.id)
        .ok_or_else(|| StoreError::conflict(format!("scene {} has been superseded", parent.id)))?;
    *slot = scene.id.clone();
    script.revision += 1;
    touch(script);
    Ok(())
}

/// Returns whether anything changed.
pub(crate) fn set_included(script: &mut Script, scene: &mut Scene, included: bool) -> StoreResult<bool> {
    if is_superseded(script, scene) {
        return Err(StoreError::conflict(format!("scene {} has been superseded", scene.id)));
    }
    if scene.is_included == included {
        return Ok(false);
    }
    scene.is_included = included;
    script.revision += 1;
    touch(script);
    Ok(true)
}

pub(crate) fn transition_sub_resource(
    script: &Script,
    scene: &mut Scene,
    kind: SubResourceKind,
    update: &SubResourceUpdate,
) -> StoreResult<TransitionOutcome> {
    if is_superseded(script, scene) {
        return Ok(TransitionOutcome::Superseded);
    }
    let sub = scene.sub_resource_mut(kind);
    if sub.state != update.from {
        return Ok(TransitionOutcome::Stale { current: sub.state });
    }
    sub.apply(update)?;
    Ok(TransitionOutcome::Applied(scene.clone()))
}

pub(crate) fn record_poll(script: &Script, scene: &mut Scene, kind: SubResourceKind) -> Option<GenerationJob> {
    if is_superseded(script, scene) {
        return None;
    }
    let sub = scene.sub_resource_mut(kind);
    if sub.state != SubResourceState::Processing {
        return None;
    }
    let job = sub.job.as_mut()?;
    job.last_polled_at = Some(Utc::now());
    job.attempts += 1;
    Some(job.clone())
}

pub(crate) fn mark_charged(script: &Script, scene: &mut Scene, kind: SubResourceKind) -> bool {
    if is_superseded(script, scene) {
        return false;
    }
    let sub = scene.sub_resource_mut(kind);
    if sub.state != SubResourceState::Completed || sub.charged {
        return false;
    }
    sub.charged = true;
    true
}

pub(crate) fn claim_composition(
    script: &mut Script,
    expected_revision: u64,
    expected_generation: u64,
) -> CompositionClaim {
    if script.composition == CompositionState::Composing {
        return CompositionClaim::InFlight {
            generation: script.generation,
        };
    }
    if script.generation != expected_generation {
        if script.composition == CompositionState::Completed {
            return CompositionClaim::AlreadyComposed {
                generation: script.generation,
            };
        }
        return CompositionClaim::Stale;
    }
    if script.revision != expected_revision {
        return CompositionClaim::Stale;
    }

    script.generation += 1;
    script.composition = CompositionState::Composing;
    script.composition_error = None;
    touch(script);
    CompositionClaim::Claimed {
        generation: script.generation,
    }
}

fn ensure_composing(script: &Script, generation: u64) -> StoreResult<()> {
    if script.composition != CompositionState::Composing || script.generation != generation {
        return Err(StoreError::conflict(format!(
            "script {} is {} at generation {}, not composing generation {}",
            script.id,
            script.composition.as_str(),
            script.generation,
            generation
        )));
    }
    Ok(())
}

pub(crate) fn complete_composition(script: &mut Script, video: &FinalVideo) -> StoreResult<()> {
    ensure_composing(script, video.generation)?;
    script.composition = CompositionState::Completed;
    script.final_video = Some(FinalVideoRef {
        generation: video.generation,
        storage_key: video.storage_key.clone(),
    });
    touch(script);
    Ok(())
}

pub(crate) fn fail_composition(script: &mut Script, generation: u64, error: ResourceError) -> StoreResult<()> {
    ensure_composing(script, generation)?;
    script.composition = CompositionState::Error;
    script.composition_error = Some(error);
    touch(script);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{
        BackendId, ErrorKind, JobHandle, ProjectId, SceneChanges, SceneConfig, SceneDraft,
    };

    fn script_with_scenes(n: u32) -> (Script, Vec<Scene>) {
        let mut script = Script::new(ProjectId::from("p1"), "text", 4.0 * n as f64, vec![]);
        script.decomposition = DecompositionStatus::Processing;
        let scenes: Vec<Scene> = (0..n)
            .map(|order| {
                Scene::from_draft(
                    script.project_id.clone(),
                    script.id.clone(),
                    order,
                    SceneDraft {
                        narration: format!("line {}", order),
                        visual_directive: "shot".into(),
                        duration_secs: 4.0,
                        backend: BackendId::Cinematic,
                        config: SceneConfig::default(),
                        needs_review: false,
                    },
                )
            })
            .collect();
        complete_decomposition(&mut script, &scenes).unwrap();
        (script, scenes)
    }

    #[test]
    fn test_complete_decomposition_requires_dense_orders() {
        let (_, scenes) = script_with_scenes(2);
        let mut script = Script::new(ProjectId::from("p1"), "t", 8.0, vec![]);
        script.decomposition = DecompositionStatus::Processing;
        let mut gap = scenes.clone();
        for s in gap.iter_mut() {
            s.script_id = script.id.clone();
        }
        gap[1].order = 5;
        assert!(matches!(
            complete_decomposition(&mut script, &gap),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_complete_decomposition_only_once() {
        let (mut script, scenes) = script_with_scenes(3);
        assert_eq!(script.scene_ids.len(), 3);
        assert_eq!(script.decomposition, DecompositionStatus::Completed);
        assert!(complete_decomposition(&mut script, &scenes).is_err());
    }

    #[test]
    fn test_scene_version_replaces_slot_once() {
        let (mut script, scenes) = script_with_scenes(2);
        let child = scenes[1].next_version(SceneChanges::default());
        insert_scene_version(&mut script, &scenes[1], &child).unwrap();
        assert_eq!(script.scene_ids[1], child.id);

        let sibling = scenes[1].next_version(SceneChanges::default());
        assert!(insert_scene_version(&mut script, &scenes[1], &sibling).is_err());
    }

    #[test]
    fn test_superseded_scene_is_frozen() {
        let (mut script, mut scenes) = script_with_scenes(1);
        let update = SubResourceUpdate::submitted(GenerationJob::new(
            BackendId::Cinematic,
            JobHandle::new("j1"),
        ));
        transition_sub_resource(&script, &mut scenes[0], SubResourceKind::Video, &update).unwrap();

        let child = scenes[0].next_version(SceneChanges::default());
        insert_scene_version(&mut script, &scenes[0], &child).unwrap();

        let outcome = transition_sub_resource(
            &script,
            &mut scenes[0],
            SubResourceKind::Video,
            &SubResourceUpdate::completed("k"),
        )
        .unwrap();
        assert_eq!(outcome, TransitionOutcome::Superseded);
        assert_eq!(scenes[0].video.state, SubResourceState::Processing);
        assert!(!mark_charged(&script, &mut scenes[0], SubResourceKind::Video));
        assert!(set_included(&mut script, &mut scenes[0], false).is_err());
    }

    #[test]
    fn test_stale_transition_is_not_applied() {
        let (script, mut scenes) = script_with_scenes(1);
        let outcome = transition_sub_resource(
            &script,
            &mut scenes[0],
            SubResourceKind::Video,
            &SubResourceUpdate::completed("k"),
        )
        .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Stale {
                current: SubResourceState::Pending
            }
        );
    }

    #[test]
    fn test_mark_charged_once() {
        let (script, mut scenes) = script_with_scenes(1);
        let scene = &mut scenes[0];
        scene.video.state = SubResourceState::Completed;
        assert!(mark_charged(&script, scene, SubResourceKind::Video));
        assert!(!mark_charged(&script, scene, SubResourceKind::Video));
    }

    #[test]
    fn test_claim_composition_sequence() {
        let (mut script, _) = script_with_scenes(1);
        let rev = script.revision;

        assert_eq!(
            claim_composition(&mut script, rev, 0),
            CompositionClaim::Claimed { generation: 1 }
        );
        assert_eq!(
            claim_composition(&mut script, rev, 0),
            CompositionClaim::InFlight { generation: 1 }
        );

        let video = FinalVideo {
            script_id: script.id.clone(),
            project_id: script.project_id.clone(),
            generation: 1,
            storage_key: "p1/s/final.mp4".into(),
            duration_secs: 4.0,
            scene_ids: script.scene_ids.clone(),
            lossless: true,
            created_at: Utc::now(),
        };
        complete_composition(&mut script, &video).unwrap();
        assert_eq!(
            claim_composition(&mut script, rev, 0),
            CompositionClaim::AlreadyComposed { generation: 1 }
        );
        assert!(complete_composition(&mut script, &video).is_err());
    }

    #[test]
    fn test_claim_rejects_changed_revision() {
        let (mut script, mut scenes) = script_with_scenes(2);
        let rev = script.revision;
        set_included(&mut script, &mut scenes[0], false).unwrap();
        assert_eq!(claim_composition(&mut script, rev, 0), CompositionClaim::Stale);
        assert_eq!(script.composition, CompositionState::Idle);
    }

    #[test]
    fn test_fail_composition_allows_new_claim() {
        let (mut script, _) = script_with_scenes(1);
        let rev = script.revision;
        claim_composition(&mut script, rev, 0);
        fail_composition(
            &mut script,
            1,
            ResourceError::new(ErrorKind::CompositionError, "ffmpeg exited with 1"),
        )
        .unwrap();
        assert_eq!(script.composition, CompositionState::Error);
        assert_eq!(
            claim_composition(&mut script, rev, 1),
            CompositionClaim::Claimed { generation: 2 }
        );
    }
}
