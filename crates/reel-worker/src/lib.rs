//! Scene pipeline worker.
//!
//! This crate provides:
//! - Script decomposition with duration correction
//! - Sub-resource submission, polling and credit charging
//! - Per-scene mux and script-level composition
//! - The [`Pipeline`] facade shared with the API
//! - The queue executor with retries, reclaim and dead-lettering

pub mod composition;
pub mod config;
pub mod context;
pub mod credits;
pub mod decomposition;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod poller;
pub mod reasoning;
pub mod retry;
pub mod submission;

pub use composition::ComposeOutcome;
pub use config::WorkerConfig;
pub use context::{PipelineContext, RuntimeParts};
pub use credits::{CreditLedger, CreditReservation, LoggingLedger, MemoryLedger};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use orchestrator::{needs_audio, needs_combination, PendingRequirement};
pub use pipeline::{NewScript, Pipeline, ScriptView, SubResourceStatus};
pub use reasoning::{HttpReasoningClient, ProposedScene, ReasoningClient, ReasoningConfig};
