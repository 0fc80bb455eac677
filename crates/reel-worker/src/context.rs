//! Shared collaborators for every pipeline stage.

use std::sync::Arc;

use tracing::warn;

use reel_media::{FfmpegComposer, MediaComposer};
use reel_models::{PipelineEvent, ProjectId};
use reel_providers::{AdapterRegistry, FetchRetryConfig, ProvidersConfig};
use reel_queue::{EventSink, JobQueue, QueueConfig, RedisEventSink, TaskSink};
use reel_storage::{ObjectStore, R2Client};
use reel_store::RecordStore;

use crate::config::WorkerConfig;
use crate::credits::{CreditLedger, LoggingLedger};
use crate::error::WorkerResult;
use crate::reasoning::{HttpReasoningClient, ReasoningClient};

/// Everything a stage needs. Workers share no other state; coordination
/// goes through `store`.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: WorkerConfig,
    pub fetch_retry: FetchRetryConfig,
    pub store: Arc<dyn RecordStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub adapters: AdapterRegistry,
    pub reasoning: Arc<dyn ReasoningClient>,
    pub composer: Arc<dyn MediaComposer>,
    pub tasks: Arc<dyn TaskSink>,
    pub events: Arc<dyn EventSink>,
    pub credits: Arc<dyn CreditLedger>,
}

/// Production collaborators plus the concrete queue for the executor.
pub struct RuntimeParts {
    pub context: PipelineContext,
    pub queue: Arc<JobQueue>,
}

impl PipelineContext {
    /// Build production collaborators from environment variables.
    pub async fn from_env(config: WorkerConfig) -> WorkerResult<RuntimeParts> {
        let store = reel_store::store_from_env().await?;
        let storage: Arc<dyn ObjectStore> = Arc::new(R2Client::from_env().await?);

        let providers = ProvidersConfig::from_env();
        let adapters = AdapterRegistry::from_config(&providers)?;

        let queue_config = QueueConfig::from_env();
        let events = Arc::new(RedisEventSink::new(&queue_config.redis_url)?);
        let queue = Arc::new(JobQueue::new(queue_config)?);

        let composer = Arc::new(FfmpegComposer::new(config.compose_timeout));
        let reasoning = Arc::new(HttpReasoningClient::from_env()?);

        let context = PipelineContext {
            config,
            fetch_retry: providers.fetch,
            store,
            storage,
            adapters,
            reasoning,
            composer,
            tasks: queue.clone(),
            events,
            credits: Arc::new(LoggingLedger),
        };

        Ok(RuntimeParts { context, queue })
    }

    /// Emit an event. Delivery is best effort and never fails the caller.
    pub async fn emit(&self, project_id: &ProjectId, event: PipelineEvent) {
        let event_type = event.event_type();
        if let Err(e) = reel_queue::emit_event(self.events.as_ref(), project_id, event).await {
            warn!(project_id = %project_id, event_type, "Failed to emit event: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use reel_media::{ComposeOutput, MediaError, MediaResult};
    use reel_queue::{MemoryEventSink, MemoryTaskQueue};
    use reel_storage::MemoryObjectStore;
    use reel_store::InMemoryStore;

    use super::*;
    use crate::credits::MemoryLedger;

    struct UnavailableComposer;

    #[async_trait]
    impl MediaComposer for UnavailableComposer {
        async fn concat(&self, _: &[PathBuf], _: &Path, _: &Path) -> MediaResult<ComposeOutput> {
            Err(MediaError::FfmpegNotFound)
        }

        async fn mux(&self, _: &Path, _: &Path, _: &Path) -> MediaResult<()> {
            Err(MediaError::FfmpegNotFound)
        }
    }

    /// Context over in-memory collaborators with no adapters.
    pub(crate) fn context(reasoning: Arc<dyn ReasoningClient>) -> PipelineContext {
        PipelineContext {
            config: WorkerConfig::default(),
            fetch_retry: FetchRetryConfig::default(),
            store: Arc::new(InMemoryStore::new()),
            storage: Arc::new(MemoryObjectStore::new()),
            adapters: AdapterRegistry::default(),
            reasoning,
            composer: Arc::new(UnavailableComposer),
            tasks: Arc::new(MemoryTaskQueue::new()),
            events: Arc::new(MemoryEventSink::new()),
            credits: Arc::new(MemoryLedger::new()),
        }
    }
}
