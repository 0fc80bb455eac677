//! RecordStore semantics exercised through the in-memory backend.

use std::sync::Arc;

use reel_models::{
    BackendId, CompositionState, DecompositionStatus, ErrorKind, FinalVideo, GenerationJob,
    JobHandle, ProjectId, ResourceError, Scene, SceneChanges, SceneConfig, SceneDraft, Script,
    SubResourceKind, SubResourceState, SubResourceUpdate,
};
use reel_store::{CompositionClaim, InMemoryStore, RecordStore, StoreError, TransitionOutcome};

async fn decomposed(store: &InMemoryStore, n: u32) -> (Script, Vec<Scene>) {
    let script = Script::new(ProjectId::from("p1"), "A short story", 4.0 * n as f64, vec![]);
    store.create_script(&script).await.unwrap();
    assert!(store
        .transition_decomposition(
            &script.id,
            DecompositionStatus::Pending,
            DecompositionStatus::Processing,
            None
        )
        .await
        .unwrap());

    let scenes: Vec<Scene> = (0..n)
        .map(|order| {
            Scene::from_draft(
                script.project_id.clone(),
                script.id.clone(),
                order,
                SceneDraft {
                    narration: String::new(),
                    visual_directive: format!("shot {}", order),
                    duration_secs: 4.0,
                    backend: BackendId::Cinematic,
                    config: SceneConfig::default(),
                    needs_review: false,
                },
            )
        })
        .collect();
    let script = store.complete_decomposition(&script.id, &scenes).await.unwrap();
    (script, scenes)
}

fn submitted() -> SubResourceUpdate {
    SubResourceUpdate::submitted(GenerationJob::new(BackendId::Cinematic, JobHandle::new("job-1")))
}

#[tokio::test]
async fn test_decomposition_transition_is_conditional() {
    let store = InMemoryStore::new();
    let script = Script::new(ProjectId::from("p1"), "text", 8.0, vec![]);
    store.create_script(&script).await.unwrap();

    let from = DecompositionStatus::Pending;
    let to = DecompositionStatus::Processing;
    assert!(store.transition_decomposition(&script.id, from, to, None).await.unwrap());
    assert!(!store.transition_decomposition(&script.id, from, to, None).await.unwrap());

    let stored = store.get_script(&script.id).await.unwrap();
    assert_eq!(stored.decomposition_attempts, 1);
}

#[tokio::test]
async fn test_create_script_twice_fails() {
    let store = InMemoryStore::new();
    let script = Script::new(ProjectId::from("p1"), "text", 8.0, vec![]);
    store.create_script(&script).await.unwrap();
    assert!(matches!(
        store.create_script(&script).await,
        Err(StoreError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_sub_resource_transition_cas() {
    let store = InMemoryStore::new();
    let (_, scenes) = decomposed(&store, 1).await;
    let id = &scenes[0].id;

    let first = store
        .transition_sub_resource(id, SubResourceKind::Video, &submitted())
        .await
        .unwrap();
    assert!(first.is_applied());

    let second = store
        .transition_sub_resource(id, SubResourceKind::Video, &submitted())
        .await
        .unwrap();
    assert_eq!(
        second,
        TransitionOutcome::Stale {
            current: SubResourceState::Processing
        }
    );

    // Sibling tracks are independent.
    let scene = store.get_scene(id).await.unwrap();
    assert_eq!(scene.state(SubResourceKind::Preview), SubResourceState::Pending);
}

#[tokio::test]
async fn test_charge_only_once() {
    let store = InMemoryStore::new();
    let (_, scenes) = decomposed(&store, 1).await;
    let id = &scenes[0].id;

    assert!(!store.mark_charged(id, SubResourceKind::Video).await.unwrap());

    store
        .transition_sub_resource(id, SubResourceKind::Video, &submitted())
        .await
        .unwrap();
    store
        .transition_sub_resource(id, SubResourceKind::Video, &SubResourceUpdate::completed("k/video.mp4"))
        .await
        .unwrap();

    assert!(store.mark_charged(id, SubResourceKind::Video).await.unwrap());
    assert!(!store.mark_charged(id, SubResourceKind::Video).await.unwrap());
}

#[tokio::test]
async fn test_regeneration_preserves_prior_version() {
    let store = InMemoryStore::new();
    let (_, scenes) = decomposed(&store, 2).await;
    let old = &scenes[1];

    store
        .transition_sub_resource(&old.id, SubResourceKind::Video, &submitted())
        .await
        .unwrap();
    let before = store.get_scene(&old.id).await.unwrap();

    let child = before.next_version(SceneChanges::default());
    let script = store.insert_scene_version(&child).await.unwrap();
    assert_eq!(script.scene_ids[1], child.id);

    // Late completion on the old version is ignored.
    let late = store
        .transition_sub_resource(&old.id, SubResourceKind::Video, &SubResourceUpdate::completed("late"))
        .await
        .unwrap();
    assert_eq!(late, TransitionOutcome::Superseded);
    assert_eq!(store.get_scene(&old.id).await.unwrap(), before);

    assert!(matches!(
        store.set_included(&old.id, false).await,
        Err(StoreError::Conflict(_))
    ));

    let listed = store.list_scenes(&script.id).await.unwrap();
    assert_eq!(listed.len(), 3);
}

#[tokio::test]
async fn test_concurrent_claims_produce_one_winner() {
    let store = Arc::new(InMemoryStore::new());
    let (script, _) = decomposed(&store, 1).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let id = script.id.clone();
        let (revision, generation) = (script.revision, script.generation);
        handles.push(tokio::spawn(async move {
            store.claim_composition(&id, revision, generation).await.unwrap()
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            CompositionClaim::Claimed { generation } => {
                assert_eq!(generation, 1);
                claimed += 1;
            }
            CompositionClaim::InFlight { generation } => assert_eq!(generation, 1),
            other => panic!("unexpected claim {:?}", other),
        }
    }
    assert_eq!(claimed, 1);
}

#[tokio::test]
async fn test_claim_is_stale_after_scene_change() {
    let store = InMemoryStore::new();
    let (script, scenes) = decomposed(&store, 2).await;

    store.set_included(&scenes[0].id, false).await.unwrap();

    let claim = store
        .claim_composition(&script.id, script.revision, script.generation)
        .await
        .unwrap();
    assert_eq!(claim, CompositionClaim::Stale);
}

#[tokio::test]
async fn test_composition_record_written_once() {
    let store = InMemoryStore::new();
    let (script, scenes) = decomposed(&store, 1).await;

    let claim = store
        .claim_composition(&script.id, script.revision, script.generation)
        .await
        .unwrap();
    assert_eq!(claim, CompositionClaim::Claimed { generation: 1 });

    let video = FinalVideo {
        script_id: script.id.clone(),
        project_id: script.project_id.clone(),
        generation: 1,
        storage_key: "p1/s/final.mp4".to_string(),
        duration_secs: 4.0,
        scene_ids: vec![scenes[0].id.clone()],
        lossless: true,
        created_at: chrono::Utc::now(),
    };
    store.complete_composition(&video).await.unwrap();
    assert!(store.complete_composition(&video).await.is_err());
    assert_eq!(store.final_video_count(&script.id).await, 1);

    let stored = store.get_script(&script.id).await.unwrap();
    assert_eq!(stored.composition, CompositionState::Completed);
    assert_eq!(
        store.get_final_video(&script.id, 1).await.unwrap(),
        Some(video)
    );

    // A repeat caller holding the old generation sees the finished result.
    let again = store
        .claim_composition(&script.id, script.revision, script.generation)
        .await
        .unwrap();
    assert_eq!(again, CompositionClaim::AlreadyComposed { generation: 1 });
}

#[tokio::test]
async fn test_failed_composition_can_be_reclaimed() {
    let store = InMemoryStore::new();
    let (script, _) = decomposed(&store, 1).await;

    store
        .claim_composition(&script.id, script.revision, 0)
        .await
        .unwrap();
    store
        .fail_composition(
            &script.id,
            1,
            ResourceError::new(ErrorKind::CompositionError, "ffmpeg timed out"),
        )
        .await
        .unwrap();

    let stored = store.get_script(&script.id).await.unwrap();
    assert_eq!(stored.composition, CompositionState::Error);

    let retry = store
        .claim_composition(&script.id, stored.revision, stored.generation)
        .await
        .unwrap();
    assert_eq!(retry, CompositionClaim::Claimed { generation: 2 });
}
