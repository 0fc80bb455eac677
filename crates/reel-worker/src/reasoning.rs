//! Client for the external script-decomposition reasoning service.
//!
//! The service is a black box: it receives a prompt describing the script
//! and the available backends and returns a JSON list of proposed scenes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reel_models::{BackendId, CapabilityTable, SceneConfig};

use crate::error::{WorkerError, WorkerResult};

/// Reasoning service configuration.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8090".to_string(),
            api_key: None,
            model: "scene-planner-v1".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl ReasoningConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: std::env::var("REASONING_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            api_key: std::env::var("REASONING_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("REASONING_MODEL").unwrap_or(defaults.model),
            timeout: Duration::from_secs(
                std::env::var("REASONING_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }
}

/// Input for one decomposition call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecompositionRequest {
    pub script_text: String,
    pub requested_duration_secs: f64,
    /// Most preferred first. Empty means no preference.
    pub preferred_backends: Vec<BackendId>,
    /// Why the previous attempt was rejected, on the retry.
    pub clarification: Option<String>,
}

/// One scene as proposed by the reasoning service or a decomposition
/// callback. Validated before it becomes a [`reel_models::Scene`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedScene {
    /// Caller-side identifier, only used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub narration: String,
    pub visual_directive: String,
    #[serde(alias = "duration_secs")]
    pub duration: f64,
    /// Backend name, parsed into a [`BackendId`] during validation.
    #[serde(alias = "backend")]
    pub platform: String,
    #[serde(default)]
    pub config: SceneConfig,
}

#[derive(Debug, Deserialize)]
struct ScenesEnvelope {
    scenes: Vec<ProposedScene>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// One call to the reasoning service. No retries.
    async fn decompose(&self, request: &DecompositionRequest) -> WorkerResult<Vec<ProposedScene>>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: String,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    output: String,
}

/// HTTP reasoning client.
pub struct HttpReasoningClient {
    config: ReasoningConfig,
    client: Client,
}

impl HttpReasoningClient {
    pub fn new(config: ReasoningConfig) -> WorkerResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WorkerError::config_error(format!("reasoning client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> WorkerResult<Self> {
        Self::new(ReasoningConfig::from_env())
    }
}

/// Prompt listing the script, the target duration and each backend's
/// duration domain.
pub fn build_prompt(request: &DecompositionRequest) -> String {
    let backends: Vec<String> = BackendId::ALL
        .iter()
        .map(|b| {
            let caps = CapabilityTable::for_backend(*b);
            format!(
                "- {}: durations {}, speech in video: {}",
                b, caps.durations, caps.native_speech
            )
        })
        .collect();

    let preference = if request.preferred_backends.is_empty() {
        "none".to_string()
    } else {
        request
            .preferred_backends
            .iter()
            .map(|b| b.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut prompt = format!(
        r#"Split the script below into ordered scenes for video generation.

Target total duration: {duration} seconds.
Preferred backends (most preferred first): {preference}
Available backends and the scene durations they accept:
{backends}

Return ONLY a single JSON object with this schema:
{{
  "scenes": [
    {{
      "narration": "Words spoken over this scene",
      "visual_directive": "What the viewer sees",
      "duration": 4,
      "platform": "cinematic"
    }}
  ]
}}

Rules:
- Every duration MUST be one the chosen backend accepts.
- Durations must add up to the target total.
- Keep the script's order. Do not drop any narration.

SCRIPT:
{script}
"#,
        duration = request.requested_duration_secs,
        preference = preference,
        backends = backends.join("\n"),
        script = request.script_text,
    );

    if let Some(reason) = &request.clarification {
        prompt.push_str(&format!(
            "\nYour previous answer was rejected: {}\nFix this and answer again.\n",
            reason
        ));
    }
    prompt
}

/// Parse the model output, tolerating markdown code fences.
pub fn parse_scenes(text: &str) -> WorkerResult<Vec<ProposedScene>> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text).trim();

    let envelope: ScenesEnvelope = serde_json::from_str(text)
        .map_err(|e| WorkerError::reasoning_failed(format!("malformed scene JSON: {}", e)))?;
    Ok(envelope.scenes)
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    async fn decompose(&self, request: &DecompositionRequest) -> WorkerResult<Vec<ProposedScene>> {
        let url = format!("{}/v1/completions", self.config.api_url);
        let body = CompletionRequest {
            model: &self.config.model,
            prompt: build_prompt(request),
            response_format: "json",
        };

        info!(
            model = %self.config.model,
            retry = request.clarification.is_some(),
            "Requesting script decomposition"
        );

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| WorkerError::reasoning_failed(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(WorkerError::reasoning_failed(format!(
                "reasoning service returned {}: {}",
                status, error_text
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::reasoning_failed(format!("unreadable response: {}", e)))?;
        debug!(bytes = completion.output.len(), "Reasoning output received");

        parse_scenes(&completion.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> DecompositionRequest {
        DecompositionRequest {
            script_text: "A harbour wakes up.".to_string(),
            requested_duration_secs: 12.0,
            preferred_backends: vec![BackendId::Cinematic],
            clarification: None,
        }
    }

    #[test]
    fn test_parse_scenes_strips_code_fence() {
        let text = "```json\n{\"scenes\":[{\"narration\":\"n\",\"visual_directive\":\"v\",\"duration\":4,\"platform\":\"clip\"}]}\n```";
        let scenes = parse_scenes(text).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].platform, "clip");
        assert_eq!(scenes[0].duration, 4.0);
    }

    #[test]
    fn test_parse_scenes_accepts_aliases() {
        let text = r#"{"scenes":[{"narration":"n","visual_directive":"v","duration_secs":8,"backend":"cinematic"}]}"#;
        let scenes = parse_scenes(text).unwrap();
        assert_eq!(scenes[0].platform, "cinematic");
        assert_eq!(scenes[0].duration, 8.0);
    }

    #[test]
    fn test_parse_scenes_rejects_garbage() {
        assert!(matches!(
            parse_scenes("I could not do that"),
            Err(WorkerError::ReasoningFailed(_))
        ));
    }

    #[test]
    fn test_prompt_carries_clarification() {
        let mut req = request();
        assert!(!build_prompt(&req).contains("previous answer"));
        req.clarification = Some("total was 30s".to_string());
        let prompt = build_prompt(&req);
        assert!(prompt.contains("previous answer was rejected: total was 30s"));
        assert!(prompt.contains("cinematic: durations {4s, 8s, 12s}"));
    }

    #[tokio::test]
    async fn test_http_client_parses_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "{\"scenes\":[{\"narration\":\"n\",\"visual_directive\":\"v\",\"duration\":4,\"platform\":\"cinematic\"}]}"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpReasoningClient::new(ReasoningConfig {
            api_url: server.uri(),
            api_key: Some("secret".to_string()),
            ..ReasoningConfig::default()
        })
        .unwrap();

        let scenes = client.decompose(&request()).await.unwrap();
        assert_eq!(scenes.len(), 1);
    }

    #[tokio::test]
    async fn test_http_client_surfaces_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = HttpReasoningClient::new(ReasoningConfig {
            api_url: server.uri(),
            ..ReasoningConfig::default()
        })
        .unwrap();

        let err = client.decompose(&request()).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
