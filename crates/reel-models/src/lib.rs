//! Shared data models for the reel scene pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Scripts, scenes and their version chain
//! - Per-scene sub-resources and the single state-transition function
//! - Backend identifiers and static capability tables
//! - The failure taxonomy and pipeline events

pub mod backend;
pub mod error_kind;
pub mod events;
pub mod generation;
pub mod ids;
pub mod scene;
pub mod script;
pub mod sub_resource;

// Re-export common types
pub use backend::{
    AspectRatio, BackendId, CapabilityTable, CapabilityViolation, CreditCosts, DurationCheck,
    DurationDomain,
};
pub use error_kind::{ErrorKind, ResourceError};
pub use events::{EventEnvelope, PipelineEvent};
pub use generation::GenerationSpec;
pub use ids::{JobHandle, ProjectId, SceneId, ScriptId};
pub use scene::{
    current_scenes, lineage, orders_are_dense, Scene, SceneChanges, SceneConfig, SceneDraft,
};
pub use script::{CompositionState, DecompositionStatus, FinalVideo, FinalVideoRef, Script};
pub use sub_resource::{
    GenerationJob, SubResource, SubResourceKind, SubResourceState, SubResourceUpdate,
    TransitionError,
};
