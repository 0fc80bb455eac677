//! Script handlers: creation, view, decomposition callback and compose.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use reel_models::{BackendId, ProjectId, Scene, ScriptId};
use reel_worker::{ComposeOutcome, NewScript, PendingRequirement, ProposedScene, ScriptView};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::verify_signature;
use crate::state::AppState;

/// Request to create a script.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateScriptRequest {
    #[validate(length(min = 1, max = 20000))]
    pub text: String,
    /// Target total duration of the final video.
    #[serde(alias = "duration")]
    #[validate(range(min = 1.0, max = 600.0))]
    pub requested_duration_secs: f64,
    #[serde(default)]
    #[validate(length(max = 3))]
    pub preferred_backends: Vec<BackendId>,
}

#[derive(Debug, Serialize)]
pub struct CreateScriptResponse {
    pub script_id: ScriptId,
    pub status: &'static str,
}

/// Create a script and queue its decomposition.
pub async fn create_script(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<CreateScriptRequest>,
) -> ApiResult<(StatusCode, Json<CreateScriptResponse>)> {
    request.validate()?;

    let script = state
        .pipeline
        .create_script(NewScript {
            project_id: ProjectId::from_string(project_id),
            text: request.text,
            requested_duration_secs: request.requested_duration_secs,
            preferred_backends: request.preferred_backends,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateScriptResponse {
            script_id: script.id,
            status: "decomposing",
        }),
    ))
}

/// Script with its current scenes.
pub async fn get_script(
    State(state): State<AppState>,
    Path((project_id, script_id)): Path<(String, String)>,
) -> ApiResult<Json<ScriptView>> {
    let view = state
        .pipeline
        .script_view(&ProjectId::from_string(project_id), &ScriptId::from_string(script_id))
        .await?;
    Ok(Json(view))
}

/// Body of the inbound decomposition callback.
#[derive(Debug, Deserialize)]
pub struct DecompositionCallback {
    /// Opaque caller metadata, logged only.
    #[serde(default)]
    pub project_metadata: Option<serde_json::Value>,
    pub scenes: Vec<ProposedScene>,
}

#[derive(Debug, Serialize)]
pub struct DecompositionCallbackResponse {
    pub script_id: ScriptId,
    pub scenes: Vec<Scene>,
}

/// Accept scenes produced by an external decomposition service.
///
/// The signature covers the raw body, so it is checked before parsing.
pub async fn decomposition_callback(
    State(state): State<AppState>,
    Path((project_id, script_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<DecompositionCallbackResponse>> {
    if let Err(e) = verify_signature(state.config.callback_signing_secret.as_deref(), &headers, &body) {
        warn!(script_id = %script_id, "Decomposition callback refused: {}", e);
        metrics::record_callback_rejected("signature");
        return Err(e);
    }

    let callback: DecompositionCallback = serde_json::from_slice(&body).map_err(|e| {
        metrics::record_callback_rejected("malformed");
        ApiError::bad_request(format!("invalid callback body: {}", e))
    })?;

    info!(
        script_id = %script_id,
        scene_count = callback.scenes.len(),
        has_metadata = callback.project_metadata.is_some(),
        "Decomposition callback received"
    );

    let script_id = ScriptId::from_string(script_id);
    let scenes = state
        .pipeline
        .apply_decomposition_callback(&ProjectId::from_string(project_id), &script_id, &callback.scenes)
        .await
        .inspect_err(|_| metrics::record_callback_rejected("invalid"))?;

    Ok(Json(DecompositionCallbackResponse { script_id, scenes }))
}

/// Answer to a compose request.
#[derive(Debug, Serialize)]
pub struct ComposeResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingRequirement>,
}

fn compose_response(outcome: ComposeOutcome) -> Response {
    let (code, status, generation, pending) = match outcome {
        ComposeOutcome::Started { generation } => (StatusCode::ACCEPTED, "started", Some(generation), Vec::new()),
        ComposeOutcome::NotReady { pending } => (StatusCode::CONFLICT, "not_ready", None, pending),
        ComposeOutcome::InFlight { generation } => (StatusCode::OK, "in_flight", Some(generation), Vec::new()),
        ComposeOutcome::AlreadyComposed { generation } => (StatusCode::OK, "completed", Some(generation), Vec::new()),
    };
    metrics::record_compose_request(status);
    (
        code,
        Json(ComposeResponse {
            status,
            generation,
            pending,
        }),
    )
        .into_response()
}

/// Start composition of the script's final video.
///
/// `409` with the unmet requirements when scenes are unfinished, `200` when
/// another request already holds or finished the current generation.
pub async fn compose_script(
    State(state): State<AppState>,
    Path((project_id, script_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let outcome = state
        .pipeline
        .compose(&ProjectId::from_string(project_id), &ScriptId::from_string(script_id))
        .await?;
    Ok(compose_response(outcome))
}
