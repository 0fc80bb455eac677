//! Durable records for scripts, scenes and final videos.
//!
//! This crate provides:
//! - The [`RecordStore`] contract: conditional, atomic record updates
//! - A Firestore REST backend using read-write transactions
//! - An in-memory backend with identical semantics
//! - Service account authentication via gcp_auth, retry and metrics

pub mod client;
pub mod error;
pub mod firestore_store;
pub mod memory;
pub mod metrics;
pub mod retry;
mod rules;
pub mod store;
pub mod token_cache;
pub mod types;

use std::sync::Arc;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{StoreError, StoreResult};
pub use firestore_store::FirestoreStore;
pub use memory::InMemoryStore;
pub use store::{CompositionClaim, RecordStore, TransitionOutcome};

/// Build the store selected by `STORE_BACKEND` (`firestore` or `memory`).
pub async fn store_from_env() -> StoreResult<Arc<dyn RecordStore>> {
    let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "firestore".to_string());
    match backend.as_str() {
        "memory" => {
            tracing::warn!("Using in-memory record store; state is lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        _ => Ok(Arc::new(FirestoreStore::from_env().await?)),
    }
}
