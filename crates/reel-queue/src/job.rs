//! Task types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reel_models::{ProjectId, SceneId, ScriptId, SubResourceKind};

fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// Run script decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomposeScriptJob {
    pub job_id: String,
    pub project_id: ProjectId,
    pub script_id: ScriptId,
    pub created_at: DateTime<Utc>,
}

impl DecomposeScriptJob {
    pub fn new(project_id: ProjectId, script_id: ScriptId) -> Self {
        Self {
            job_id: new_job_id(),
            project_id,
            script_id,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("decompose:{}", self.script_id)
    }
}

/// Submit one sub-resource to its provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitGenerationJob {
    pub job_id: String,
    pub project_id: ProjectId,
    pub scene_id: SceneId,
    pub kind: SubResourceKind,
    pub created_at: DateTime<Utc>,
}

impl SubmitGenerationJob {
    pub fn new(project_id: ProjectId, scene_id: SceneId, kind: SubResourceKind) -> Self {
        Self {
            job_id: new_job_id(),
            project_id,
            scene_id,
            kind,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("submit:{}:{}", self.scene_id, self.kind)
    }
}

/// Check a processing sub-resource once. Re-enqueued by the poller until the
/// sub-resource is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollGenerationJob {
    pub job_id: String,
    pub project_id: ProjectId,
    pub scene_id: SceneId,
    pub kind: SubResourceKind,
    /// Number of polls before this one.
    #[serde(default)]
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl PollGenerationJob {
    pub fn new(project_id: ProjectId, scene_id: SceneId, kind: SubResourceKind) -> Self {
        Self {
            job_id: new_job_id(),
            project_id,
            scene_id,
            kind,
            attempt: 0,
            created_at: Utc::now(),
        }
    }

    /// The follow-up poll.
    pub fn next(&self) -> Self {
        Self {
            job_id: new_job_id(),
            project_id: self.project_id.clone(),
            scene_id: self.scene_id.clone(),
            kind: self.kind,
            attempt: self.attempt + 1,
            created_at: Utc::now(),
        }
    }
}

/// Mux a scene's video and audio into its `final` sub-resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxSceneJob {
    pub job_id: String,
    pub project_id: ProjectId,
    pub scene_id: SceneId,
    pub created_at: DateTime<Utc>,
}

impl MuxSceneJob {
    pub fn new(project_id: ProjectId, scene_id: SceneId) -> Self {
        Self {
            job_id: new_job_id(),
            project_id,
            scene_id,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("mux:{}", self.scene_id)
    }
}

/// Run a claimed composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeScriptJob {
    pub job_id: String,
    pub project_id: ProjectId,
    pub script_id: ScriptId,
    /// Generation returned by the claim.
    pub generation: u64,
    /// Included scene versions that passed the readiness gate, in order.
    #[serde(default)]
    pub scene_ids: Vec<SceneId>,
    pub created_at: DateTime<Utc>,
}

impl ComposeScriptJob {
    pub fn new(project_id: ProjectId, script_id: ScriptId, generation: u64, scene_ids: Vec<SceneId>) -> Self {
        Self {
            job_id: new_job_id(),
            project_id,
            script_id,
            generation,
            scene_ids,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("compose:{}:{}", self.script_id, self.generation)
    }
}

/// Queue job wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    DecomposeScript(DecomposeScriptJob),
    SubmitGeneration(SubmitGenerationJob),
    PollGeneration(PollGenerationJob),
    MuxScene(MuxSceneJob),
    ComposeScript(ComposeScriptJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &str {
        match self {
            QueueJob::DecomposeScript(j) => &j.job_id,
            QueueJob::SubmitGeneration(j) => &j.job_id,
            QueueJob::PollGeneration(j) => &j.job_id,
            QueueJob::MuxScene(j) => &j.job_id,
            QueueJob::ComposeScript(j) => &j.job_id,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        match self {
            QueueJob::DecomposeScript(j) => &j.project_id,
            QueueJob::SubmitGeneration(j) => &j.project_id,
            QueueJob::PollGeneration(j) => &j.project_id,
            QueueJob::MuxScene(j) => &j.project_id,
            QueueJob::ComposeScript(j) => &j.project_id,
        }
    }

    /// Short name used in logs and metric labels.
    pub fn job_type(&self) -> &'static str {
        match self {
            QueueJob::DecomposeScript(_) => "decompose_script",
            QueueJob::SubmitGeneration(_) => "submit_generation",
            QueueJob::PollGeneration(_) => "poll_generation",
            QueueJob::MuxScene(_) => "mux_scene",
            QueueJob::ComposeScript(_) => "compose_script",
        }
    }

    /// Deduplication key. Polls have none: a poll re-enqueues itself while
    /// still running.
    pub fn idempotency_key(&self) -> Option<String> {
        match self {
            QueueJob::DecomposeScript(j) => Some(j.idempotency_key()),
            QueueJob::SubmitGeneration(j) => Some(j.idempotency_key()),
            QueueJob::PollGeneration(_) => None,
            QueueJob::MuxScene(j) => Some(j.idempotency_key()),
            QueueJob::ComposeScript(j) => Some(j.idempotency_key()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_job_serde_tagging() {
        let job = QueueJob::SubmitGeneration(SubmitGenerationJob::new(
            ProjectId::from("p1"),
            SceneId::from("sc1"),
            SubResourceKind::Video,
        ));
        let json = serde_json::to_value(&job).expect("serialize QueueJob");
        assert_eq!(json["type"], "submit_generation");
        assert_eq!(json["kind"], "video");

        let decoded: QueueJob = serde_json::from_value(json).expect("deserialize QueueJob");
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_idempotency_keys() {
        let submit = QueueJob::SubmitGeneration(SubmitGenerationJob::new(
            ProjectId::from("p1"),
            SceneId::from("sc1"),
            SubResourceKind::Audio,
        ));
        assert_eq!(submit.idempotency_key().as_deref(), Some("submit:sc1:audio"));

        let compose = QueueJob::ComposeScript(ComposeScriptJob::new(
            ProjectId::from("p1"),
            ScriptId::from("s1"),
            3,
            vec![SceneId::from("sc1"), SceneId::from("sc2")],
        ));
        assert_eq!(compose.idempotency_key().as_deref(), Some("compose:s1:3"));

        let poll = QueueJob::PollGeneration(PollGenerationJob::new(
            ProjectId::from("p1"),
            SceneId::from("sc1"),
            SubResourceKind::Video,
        ));
        assert!(poll.idempotency_key().is_none());
    }

    #[test]
    fn test_poll_next_increments_attempt() {
        let poll = PollGenerationJob::new(
            ProjectId::from("p1"),
            SceneId::from("sc1"),
            SubResourceKind::Preview,
        );
        let next = poll.next().next();
        assert_eq!(next.attempt, 2);
        assert_eq!(next.scene_id, poll.scene_id);
        assert_ne!(next.job_id, poll.job_id);
    }
}
