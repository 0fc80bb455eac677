//! Short clip generation.

use std::time::Duration;

use async_trait::async_trait;
use reel_models::{BackendId, GenerationSpec, JobHandle, SubResourceKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapter::{ByteStream, GenerationAdapter, PollStatus};
use crate::config::EndpointConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::http::ProviderHttp;

#[derive(Debug, Serialize)]
struct TaskRequest<'a> {
    #[serde(rename = "type")]
    task_type: &'static str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    ratio: String,
    #[serde(skip_serializing_if = "super::is_null")]
    options: &'a serde_json::Value,
}

/// Every response is wrapped in a `{code, message, data}` envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> ProviderResult<T> {
        if self.code != 0 {
            return Err(ProviderError::rejected(200, format!("code {}: {}", self.code, self.message)));
        }
        self.data
            .ok_or_else(|| ProviderError::invalid_response("response envelope without data"))
    }
}

#[derive(Debug, Deserialize)]
struct TaskCreated {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    task_status: String,
    #[serde(default)]
    task_status_msg: Option<String>,
    #[serde(default)]
    task_result: Option<TaskResult>,
}

pub struct ClipAdapter {
    http: ProviderHttp,
}

impl ClipAdapter {
    pub fn new(endpoint: EndpointConfig, timeout: Duration) -> ProviderResult<Self> {
        Ok(Self {
            http: ProviderHttp::new("clip", endpoint, timeout)?,
        })
    }
}

#[async_trait]
impl GenerationAdapter for ClipAdapter {
    fn backend(&self) -> BackendId {
        BackendId::Clip
    }

    async fn submit(&self, spec: &GenerationSpec) -> ProviderResult<JobHandle> {
        self.capabilities().validate(spec)?;

        let (task_type, duration) = match spec.kind {
            SubResourceKind::Preview => ("image", None),
            _ => ("video", Some(format!("{}", spec.duration_secs.round() as u32))),
        };
        let body = TaskRequest {
            task_type,
            prompt: &spec.prompt,
            duration,
            ratio: spec.aspect_ratio.to_string(),
            options: &spec.extra,
        };

        let envelope: Envelope<TaskCreated> = self.http.post_json("submit", "/api/tasks", &body).await?;
        let created = envelope.into_data()?;
        debug!(task_id = %created.task_id, task_type, "Clip task submitted");
        Ok(JobHandle::new(created.task_id))
    }

    async fn poll(&self, handle: &JobHandle) -> ProviderResult<PollStatus> {
        let envelope: Envelope<TaskStatus> = self
            .http
            .get_json("poll", &format!("/api/tasks/{}", handle))
            .await?;
        let status = envelope.into_data()?;

        match status.task_status.as_str() {
            "submitted" => Ok(PollStatus::Pending),
            "processing" => Ok(PollStatus::Processing),
            "succeed" => status
                .task_result
                .map(|r| PollStatus::Completed { locator: r.url })
                .ok_or_else(|| ProviderError::invalid_response("succeeded task without result")),
            "failed" => Ok(PollStatus::Failed {
                message: status
                    .task_status_msg
                    .unwrap_or_else(|| "clip task failed".to_string()),
            }),
            other => Err(ProviderError::invalid_response(format!("unknown task status '{}'", other))),
        }
    }

    async fn fetch(&self, locator: &str) -> ProviderResult<ByteStream> {
        self.http.stream(locator).await
    }
}
