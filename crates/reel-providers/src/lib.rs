//! Generation backend adapters.
//!
//! This crate provides:
//! - The [`GenerationAdapter`] contract `{submit, poll, fetch}`
//! - HTTP adapters for the presenter, cinematic and clip families
//! - The immutable [`AdapterRegistry`] keyed by `BackendId`
//! - Artifact download with capped exponential backoff

pub mod adapter;
pub mod adapters;
pub mod config;
pub mod error;
pub mod fetch;
mod http;
pub mod metrics;
pub mod registry;

pub use adapter::{ByteStream, GenerationAdapter, PollStatus};
pub use adapters::{CinematicAdapter, ClipAdapter, PresenterAdapter};
pub use config::{EndpointConfig, FetchRetryConfig, ProvidersConfig};
pub use error::{ProviderError, ProviderResult};
pub use fetch::fetch_to_file;
pub use registry::AdapterRegistry;
