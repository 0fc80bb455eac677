//! Firestore backend against a mock REST server.

use reel_models::{
    BackendId, GenerationJob, JobHandle, ProjectId, Scene, SceneConfig, SceneDraft, Script,
    SubResourceKind, SubResourceState,
};
use reel_store::types::Document;
use reel_store::{FirestoreClient, FirestoreConfig, FirestoreStore, RecordStore, StoreError};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn store_for(server: &MockServer) -> FirestoreStore {
    let config = FirestoreConfig::emulator("test-project", server.uri());
    FirestoreStore::new(FirestoreClient::new(config).await.unwrap())
}

fn completed_scene() -> (Script, Scene) {
    let mut script = Script::new(ProjectId::from("p1"), "text", 4.0, vec![]);
    let mut scene = Scene::from_draft(
        script.project_id.clone(),
        script.id.clone(),
        0,
        SceneDraft {
            narration: String::new(),
            visual_directive: "harbour at dawn".into(),
            duration_secs: 4.0,
            backend: BackendId::Cinematic,
            config: SceneConfig::default(),
            needs_review: false,
        },
    );
    script.scene_ids = vec![scene.id.clone()];
    let video = scene.sub_resource_mut(SubResourceKind::Video);
    video.state = SubResourceState::Completed;
    video.artifact_key = Some("p1/s/0-x/video.mp4".into());
    video.job = Some(GenerationJob::new(BackendId::Cinematic, JobHandle::new("job-1")));
    (script, scene)
}

async fn mount_transaction(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(r":beginTransaction$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "transaction": "dHgtMQ=="
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r":rollback$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(server)
        .await;
}

async fn mount_records(server: &MockServer, script: &Script, scene: &Scene) {
    Mock::given(method("GET"))
        .and(path_regex(format!(r"/documents/scripts/{}$", script.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(Document::from_record(script).unwrap()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(format!(r"/documents/scenes/{}$", scene.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(Document::from_record(scene).unwrap()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_get_scene_round_trips_record() {
    let server = MockServer::start().await;
    let (script, scene) = completed_scene();
    mount_records(&server, &script, &scene).await;

    let store = store_for(&server).await;
    assert_eq!(store.get_scene(&scene.id).await.unwrap(), scene);
    assert_eq!(store.get_script(&script.id).await.unwrap(), script);
}

#[tokio::test]
async fn test_missing_scene_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"/documents/scenes/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    let result = store.get_scene(&"missing".into()).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_mark_charged_retries_aborted_transaction() {
    let server = MockServer::start().await;
    let (script, scene) = completed_scene();
    mount_transaction(&server).await;
    mount_records(&server, &script, &scene).await;

    Mock::given(method("POST"))
        .and(path_regex(r":commit$"))
        .respond_with(ResponseTemplate::new(409).set_body_string(
            r#"{"error":{"code":409,"status":"ABORTED","message":"Transaction lock timeout"}}"#,
        ))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r":commit$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "writeResults": [{}],
            "commitTime": "2026-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    assert!(store.mark_charged(&scene.id, SubResourceKind::Video).await.unwrap());
}

#[tokio::test]
async fn test_rejected_transition_commits_nothing() {
    let server = MockServer::start().await;
    let (script, scene) = completed_scene();
    mount_transaction(&server).await;
    mount_records(&server, &script, &scene).await;

    Mock::given(method("POST"))
        .and(path_regex(r":commit$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = store_for(&server).await;
    // Video is already completed, so a poll has nothing to record.
    let job = store.record_poll(&scene.id, SubResourceKind::Video).await.unwrap();
    assert!(job.is_none());
}
