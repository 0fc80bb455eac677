//! Application state.

use std::sync::Arc;

use reel_queue::JobQueue;
use reel_worker::{Pipeline, PipelineContext, WorkerConfig, WorkerResult};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub pipeline: Pipeline,
    /// Redis queue, probed by `/ready`. Absent when tasks go to an
    /// in-process sink.
    pub queue: Option<Arc<JobQueue>>,
}

impl AppState {
    /// Create state over the production collaborators.
    pub async fn new(config: ApiConfig) -> WorkerResult<Self> {
        let parts = PipelineContext::from_env(WorkerConfig::from_env()).await?;
        Ok(Self {
            config,
            pipeline: Pipeline::new(parts.context),
            queue: Some(parts.queue),
        })
    }

    /// State over an already-built pipeline.
    pub fn with_pipeline(config: ApiConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            pipeline,
            queue: None,
        }
    }
}
