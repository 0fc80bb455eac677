//! The generation adapter contract.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use reel_models::{BackendId, CapabilityTable, GenerationSpec, JobHandle};

use crate::error::ProviderResult;

/// Chunked artifact body.
pub type ByteStream = Pin<Box<dyn Stream<Item = ProviderResult<Vec<u8>>> + Send>>;

/// Observed state of a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Processing,
    /// Finished; `locator` is passed to [`GenerationAdapter::fetch`].
    Completed { locator: String },
    Failed { message: String },
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Pending => "pending",
            PollStatus::Processing => "processing",
            PollStatus::Completed { .. } => "completed",
            PollStatus::Failed { .. } => "failed",
        }
    }
}

/// One external provider family. Implementations are stateless; job state
/// lives on the scene record.
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    fn backend(&self) -> BackendId;

    fn capabilities(&self) -> &'static CapabilityTable {
        CapabilityTable::for_backend(self.backend())
    }

    /// Start a job. Validates `spec` against the capability table before any
    /// remote call.
    async fn submit(&self, spec: &GenerationSpec) -> ProviderResult<JobHandle>;

    /// One non-blocking status check. Safe to repeat.
    async fn poll(&self, handle: &JobHandle) -> ProviderResult<PollStatus>;

    /// Open the finished artifact for download.
    async fn fetch(&self, locator: &str) -> ProviderResult<ByteStream>;
}
