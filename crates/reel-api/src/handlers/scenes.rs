//! Scene handlers: sub-resource status, tracks, regeneration, inclusion.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use reel_models::{Scene, SceneChanges, SceneId, SubResourceKind};
use reel_worker::SubResourceStatus;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// State of one sub-resource, with a presigned URL once completed.
pub async fn get_sub_resource(
    State(state): State<AppState>,
    Path((scene_id, kind)): Path<(String, String)>,
) -> ApiResult<Json<SubResourceStatus>> {
    let kind = SubResourceKind::from_str(&kind).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let status = state
        .pipeline
        .sub_resource_status(&SceneId::from_string(scene_id), kind)
        .await?;
    Ok(Json(status))
}

#[derive(Debug, Serialize)]
pub struct StartTracksResponse {
    pub scene_id: SceneId,
    pub started: Vec<SubResourceKind>,
}

/// Start the video track, and audio when the scene needs it.
pub async fn start_tracks(
    State(state): State<AppState>,
    Path(scene_id): Path<String>,
) -> ApiResult<(StatusCode, Json<StartTracksResponse>)> {
    let scene_id = SceneId::from_string(scene_id);
    let started = state.pipeline.start_scene_tracks(&scene_id).await?;
    Ok((StatusCode::ACCEPTED, Json(StartTracksResponse { scene_id, started })))
}

#[derive(Debug, Serialize)]
pub struct SceneResponse {
    pub scene: Scene,
}

/// Create the next version of a scene. Omitted fields are inherited.
pub async fn regenerate_scene(
    State(state): State<AppState>,
    Path(scene_id): Path<String>,
    Json(changes): Json<SceneChanges>,
) -> ApiResult<(StatusCode, Json<SceneResponse>)> {
    let scene = state
        .pipeline
        .regenerate_scene(&SceneId::from_string(scene_id), changes)
        .await?;
    Ok((StatusCode::CREATED, Json(SceneResponse { scene })))
}

#[derive(Debug, Deserialize)]
pub struct SetIncludedRequest {
    #[serde(alias = "is_included")]
    pub included: bool,
}

pub async fn set_included(
    State(state): State<AppState>,
    Path(scene_id): Path<String>,
    Json(request): Json<SetIncludedRequest>,
) -> ApiResult<Json<SceneResponse>> {
    let scene = state
        .pipeline
        .set_included(&SceneId::from_string(scene_id), request.included)
        .await?;
    Ok(Json(SceneResponse { scene }))
}
