//! Talking-presenter videos and standalone speech.
//!
//! Video and speech jobs share one job namespace on the provider, so a
//! single poll endpoint covers both kinds.

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
struct VideoRequest<'a> {
    script: &'a str,
    visual_directive: &'a str,
    duration_seconds: f64,
    aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
    #[serde(skip_serializing_if = "super::is_null")]
    options: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct JobCreated {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
    #[serde(default)]
    result_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct PresenterAdapter {
    http: ProviderHttp,
}

impl PresenterAdapter {
    pub fn new(endpoint: EndpointConfig, timeout: Duration) -> ProviderResult<Self> {
        Ok(Self {
            http: ProviderHttp::new("presenter", endpoint, timeout)?,
        })
    }
}

#[async_trait]
impl GenerationAdapter for PresenterAdapter {
    fn backend(&self) -> BackendId {
        BackendId::Presenter
    }

    async fn submit(&self, spec: &GenerationSpec) -> ProviderResult<JobHandle> {
        self.capabilities().validate(spec)?;

        let narration = spec.narration.as_deref().unwrap_or_default();
        let created: JobCreated = match spec.kind {
            SubResourceKind::Audio => {
                if narration.trim().is_empty() {
                    return Err(ProviderError::rejected(400, "speech requires narration text"));
                }
                let body = SpeechRequest {
                    text: narration,
                    voice: spec.voice.as_deref(),
                    format: "mp3",
                };
                self.http.post_json("submit", "/v1/speech", &body).await?
            }
            _ => {
                let body = VideoRequest {
                    script: narration,
                    visual_directive: &spec.prompt,
                    duration_seconds: spec.duration_secs,
                    aspect_ratio: spec.aspect_ratio.to_string(),
                    avatar_image: spec.reference_images.first().map(String::as_str),
                    voice: spec.voice.as_deref(),
                    options: &spec.extra,
                };
                self.http.post_json("submit", "/v1/videos", &body).await?
            }
        };

        debug!(job_id = %created.job_id, kind = %spec.kind, "Presenter job submitted");
        Ok(JobHandle::new(created.job_id))
    }

    async fn poll(&self, handle: &JobHandle) -> ProviderResult<PollStatus> {
        let status: JobStatus = self
            .http
            .get_json("poll", &format!("/v1/jobs/{}", handle))
            .await?;

        match status.status.as_str() {
            "queued" | "pending" => Ok(PollStatus::Pending),
            "processing" | "rendering" => Ok(PollStatus::Processing),
            "completed" => status
                .result_url
                .map(|locator| PollStatus::Completed { locator })
                .ok_or_else(|| ProviderError::invalid_response("completed job without result_url")),
            "failed" => Ok(PollStatus::Failed {
                message: status.error.unwrap_or_else(|| "presenter job failed".to_string()),
            }),
            other => Err(ProviderError::invalid_response(format!("unknown job status '{}'", other))),
        }
    }

    async fn fetch(&self, locator: &str) -> ProviderResult<ByteStream> {
        self.http.stream(locator).await
    }
}
