//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::{
    compose_script, create_script, decomposition_callback, get_script, get_sub_resource, health, ready,
    regenerate_scene, set_included, start_tracks,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, rate_limit_middleware, request_id, request_logging, security_headers, RateLimiterCache};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let script_routes = Router::new()
        .route("/projects/:project_id/scripts", post(create_script))
        .route("/projects/:project_id/scripts/:script_id", get(get_script))
        .route(
            "/projects/:project_id/scripts/:script_id/decomposition",
            post(decomposition_callback),
        )
        .route("/projects/:project_id/scripts/:script_id/compose", post(compose_script));

    let scene_routes = Router::new()
        .route("/scenes/:scene_id/tracks", post(start_tracks))
        .route("/scenes/:scene_id/regenerate", post(regenerate_scene))
        .route("/scenes/:scene_id/included", put(set_included))
        .route("/scenes/:scene_id/:kind", get(get_sub_resource));

    let rate_limiter = Arc::new(RateLimiterCache::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    ));

    let api_routes = Router::new()
        .merge(script_routes)
        .merge(scene_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(CompressionLayer::new())
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
