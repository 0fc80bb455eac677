//! HTTP API for the scene pipeline.
//!
//! Scripts are created and composed here; generation work runs in
//! `reel-worker` processes fed through the shared task queue.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
