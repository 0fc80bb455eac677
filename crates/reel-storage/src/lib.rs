//! Artifact storage on Cloudflare R2.
//!
//! This crate provides:
//! - The [`ObjectStore`] seam with write-once semantics
//! - An R2 client using conditional puts
//! - An in-memory store for tests
//! - The object key layout for scene and script artifacts

pub mod client;
pub mod error;
pub mod keys;
pub mod object_store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use keys::{final_video_key, scene_artifact_key, scene_key};
pub use object_store::{MemoryObjectStore, ObjectStore};
