//! Firestore-backed record store.
//!
//! Every mutation runs in a read-write transaction: the records it depends
//! on are read inside the transaction, the shared rule decides the change,
//! and the writes commit atomically. Aborted transactions are retried with
//! linear backoff.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use reel_models::{
    DecompositionStatus, FinalVideo, GenerationJob, ResourceError, Scene, SceneId, Script,
    ScriptId, SubResourceKind, SubResourceUpdate,
};

use crate::client::FirestoreClient;
use crate::error::{StoreError, StoreResult};
use crate::metrics::record_cas_conflict;
use crate::retry::exhausted;
use crate::rules;
use crate::store::{CompositionClaim, RecordStore, TransitionOutcome};
use crate::types::{Document, StructuredQuery, Value, Write};

const SCRIPTS: &str = "scripts";
const SCENES: &str = "scenes";
const FINAL_VIDEOS: &str = "final_videos";

/// Maximum transaction attempts under contention.
const MAX_TX_ATTEMPTS: u32 = 5;

/// Base delay between transaction attempts.
const TX_RETRY_BASE_DELAY_MS: u64 = 50;

pub struct FirestoreStore {
    client: FirestoreClient,
}

impl FirestoreStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn from_env() -> StoreResult<Self> {
        Ok(Self::new(FirestoreClient::from_env().await?))
    }

    async fn read<T: for<'de> serde::Deserialize<'de>>(
        &self,
        collection: &str,
        id: &str,
        tx: &str,
    ) -> StoreResult<T> {
        self.client
            .get_document_in(collection, id, tx)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("{}/{}", collection, id)))?
            .to_record()
    }

    async fn read_scene_and_script(&self, scene_id: &SceneId, tx: &str) -> StoreResult<(Scene, Script)> {
        let scene: Scene = self.read(SCENES, scene_id.as_str(), tx).await?;
        let script: Script = self.read(SCRIPTS, scene.script_id.as_str(), tx).await?;
        Ok((scene, script))
    }

    fn update(&self, collection: &str, id: &str, record: &impl serde::Serialize) -> StoreResult<Write> {
        Ok(Write::update(
            self.client.document_name(collection, id),
            Document::from_record(record)?,
        ))
    }

    fn create(&self, collection: &str, id: &str, record: &impl serde::Serialize) -> StoreResult<Write> {
        Ok(Write::create(
            self.client.document_name(collection, id),
            Document::from_record(record)?,
        ))
    }

    /// Run `body` inside a transaction and commit the writes it returns.
    async fn transact<T, F, Fut>(&self, operation: &str, body: F) -> StoreResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = StoreResult<(T, Vec<Write>)>>,
    {
        for attempt in 0..MAX_TX_ATTEMPTS {
            let tx = self.client.begin_transaction().await?;

            let (value, writes) = match body(tx.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    if let Err(rollback_err) = self.client.rollback(&tx).await {
                        debug!(operation, error = %rollback_err, "Transaction rollback failed");
                    }
                    return Err(e);
                }
            };

            if writes.is_empty() {
                self.client.rollback(&tx).await.ok();
                return Ok(value);
            }

            match self.client.commit(writes, Some(tx)).await {
                Ok(_) => return Ok(value),
                Err(e) if e.is_precondition_failed() => {
                    record_cas_conflict(operation);
                    debug!(operation, attempt = attempt + 1, "Transaction aborted, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        TX_RETRY_BASE_DELAY_MS * (attempt as u64 + 1),
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }

        warn!(operation, retries = MAX_TX_ATTEMPTS, "Transaction failed after retries");
        Err(exhausted(operation))
    }
}

#[async_trait]
impl RecordStore for FirestoreStore {
    async fn create_script(&self, script: &Script) -> StoreResult<()> {
        let doc = Document::from_record(script)?;
        self.client
            .with_retry("create_script", || {
                self.client.create_document(SCRIPTS, script.id.as_str(), &doc)
            })
            .await?;
        Ok(())
    }

    async fn get_script(&self, id: &ScriptId) -> StoreResult<Script> {
        self.client
            .with_retry("get_script", || self.client.get_document(SCRIPTS, id.as_str()))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("{}/{}", SCRIPTS, id)))?
            .to_record()
    }

    async fn transition_decomposition(
        &self,
        id: &ScriptId,
        from: DecompositionStatus,
        to: DecompositionStatus,
        error: Option<ResourceError>,
    ) -> StoreResult<bool> {
        self.transact("transition_decomposition", |tx| {
            let error = error.clone();
            async move {
                let mut script: Script = self.read(SCRIPTS, id.as_str(), &tx).await?;
                if !rules::transition_decomposition(&mut script, from, to, error) {
                    return Ok((false, vec![]));
                }
                Ok((true, vec![self.update(SCRIPTS, id.as_str(), &script)?]))
            }
        })
        .await
    }

    async fn complete_decomposition(&self, id: &ScriptId, scenes: &[Scene]) -> StoreResult<Script> {
        self.transact("complete_decomposition", |tx| async move {
            let mut script: Script = self.read(SCRIPTS, id.as_str(), &tx).await?;
            rules::complete_decomposition(&mut script, scenes)?;

            let mut writes = vec![self.update(SCRIPTS, id.as_str(), &script)?];
            for scene in scenes {
                writes.push(self.create(SCENES, scene.id.as_str(), scene)?);
            }
            Ok((script, writes))
        })
        .await
    }

    async fn get_scene(&self, id: &SceneId) -> StoreResult<Scene> {
        self.client
            .with_retry("get_scene", || self.client.get_document(SCENES, id.as_str()))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("{}/{}", SCENES, id)))?
            .to_record()
    }

    async fn list_scenes(&self, script_id: &ScriptId) -> StoreResult<Vec<Scene>> {
        let docs = self
            .client
            .with_retry("list_scenes", || {
                self.client.run_query(StructuredQuery::field_equals(
                    SCENES,
                    "script_id",
                    Value::StringValue(script_id.to_string()),
                ))
            })
            .await?;

        let mut scenes = Vec::with_capacity(docs.len());
        for doc in docs {
            match doc.to_record::<Scene>() {
                Ok(scene) => scenes.push(scene),
                Err(e) => warn!(
                    script_id = %script_id,
                    doc = ?doc.id(),
                    error = %e,
                    "Skipping unreadable scene document"
                ),
            }
        }
        scenes.sort_by(|a, b| a.order.cmp(&b.order).then(a.version.cmp(&b.version)));
        Ok(scenes)
    }

    async fn insert_scene_version(&self, scene: &Scene) -> StoreResult<Script> {
        let parent_id = scene
            .parent_scene
            .as_ref()
            .ok_or_else(|| StoreError::conflict("new version must reference its parent"))?;

        self.transact("insert_scene_version", |tx| async move {
            let (parent, mut script) = self.read_scene_and_script(parent_id, &tx).await?;
            rules::insert_scene_version(&mut script, &parent, scene)?;
            let writes = vec![
                self.update(SCRIPTS, script.id.as_str(), &script)?,
                self.create(SCENES, scene.id.as_str(), scene)?,
            ];
            Ok((script, writes))
        })
        .await
    }

    async fn set_included(&self, scene_id: &SceneId, included: bool) -> StoreResult<Scene> {
        self.transact("set_included", |tx| async move {
            let (mut scene, mut script) = self.read_scene_and_script(scene_id, &tx).await?;
            if !rules::set_included(&mut script, &mut scene, included)? {
                return Ok((scene, vec![]));
            }
            let writes = vec![
                self.update(SCENES, scene_id.as_str(), &scene)?,
                self.update(SCRIPTS, script.id.as_str(), &script)?,
            ];
            Ok((scene, writes))
        })
        .await
    }

    async fn transition_sub_resource(
        &self,
        scene_id: &SceneId,
        kind: SubResourceKind,
        update: &SubResourceUpdate,
    ) -> StoreResult<TransitionOutcome> {
        self.transact("transition_sub_resource", |tx| async move {
            let (mut scene, script) = self.read_scene_and_script(scene_id, &tx).await?;
            let outcome = rules::transition_sub_resource(&script, &mut scene, kind, update)?;
            let writes = if outcome.is_applied() {
                vec![self.update(SCENES, scene_id.as_str(), &scene)?]
            } else {
                vec![]
            };
            Ok((outcome, writes))
        })
        .await
    }

    async fn record_poll(
        &self,
        scene_id: &SceneId,
        kind: SubResourceKind,
    ) -> StoreResult<Option<GenerationJob>> {
        self.transact("record_poll", |tx| async move {
            let (mut scene, script) = self.read_scene_and_script(scene_id, &tx).await?;
            match rules::record_poll(&script, &mut scene, kind) {
                Some(job) => Ok((Some(job), vec![self.update(SCENES, scene_id.as_str(), &scene)?])),
                None => Ok((None, vec![])),
            }
        })
        .await
    }

    async fn mark_charged(&self, scene_id: &SceneId, kind: SubResourceKind) -> StoreResult<bool> {
        self.transact("mark_charged", |tx| async move {
            let (mut scene, script) = self.read_scene_and_script(scene_id, &tx).await?;
            if !rules::mark_charged(&script, &mut scene, kind) {
                return Ok((false, vec![]));
            }
            Ok((true, vec![self.update(SCENES, scene_id.as_str(), &scene)?]))
        })
        .await
    }

    async fn claim_composition(
        &self,
        script_id: &ScriptId,
        expected_revision: u64,
        expected_generation: u64,
    ) -> StoreResult<CompositionClaim> {
        self.transact("claim_composition", |tx| async move {
            let mut script: Script = self.read(SCRIPTS, script_id.as_str(), &tx).await?;
            let claim = rules::claim_composition(&mut script, expected_revision, expected_generation);
            let writes = match claim {
                CompositionClaim::Claimed { .. } => {
                    vec![self.update(SCRIPTS, script_id.as_str(), &script)?]
                }
                _ => vec![],
            };
            Ok((claim, writes))
        })
        .await
    }

    async fn complete_composition(&self, video: &FinalVideo) -> StoreResult<()> {
        self.transact("complete_composition", |tx| async move {
            let mut script: Script = self.read(SCRIPTS, video.script_id.as_str(), &tx).await?;
            rules::complete_composition(&mut script, video)?;
            let writes = vec![
                self.create(FINAL_VIDEOS, &video.id(), video)?,
                self.update(SCRIPTS, script.id.as_str(), &script)?,
            ];
            Ok(((), writes))
        })
        .await
    }

    async fn fail_composition(
        &self,
        script_id: &ScriptId,
        generation: u64,
        error: ResourceError,
    ) -> StoreResult<()> {
        self.transact("fail_composition", |tx| {
            let error = error.clone();
            async move {
                let mut script: Script = self.read(SCRIPTS, script_id.as_str(), &tx).await?;
                rules::fail_composition(&mut script, generation, error)?;
                Ok(((), vec![self.update(SCRIPTS, script_id.as_str(), &script)?]))
            }
        })
        .await
    }

    async fn get_final_video(
        &self,
        script_id: &ScriptId,
        generation: u64,
    ) -> StoreResult<Option<FinalVideo>> {
        let id = FinalVideo::record_id(script_id, generation);
        match self
            .client
            .with_retry("get_final_video", || self.client.get_document(FINAL_VIDEOS, &id))
            .await?
        {
            Some(doc) => Ok(Some(doc.to_record()?)),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        // A missing document is a successful round trip.
        self.client.get_document(SCRIPTS, "_health").await.map(|_| ())
    }
}
