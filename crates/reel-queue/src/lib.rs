//! Redis Streams task queue.
//!
//! This crate provides:
//! - Task enqueueing via Redis Streams with idempotency keys
//! - Worker consumption with retry/DLQ
//! - A sorted-set delay queue for polls and backoff
//! - Pipeline events via Redis Pub/Sub

pub mod error;
pub mod events;
pub mod job;
pub mod memory;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use events::{emit_event, EventSink, MemoryEventSink, RedisEventSink};
pub use job::{
    ComposeScriptJob, DecomposeScriptJob, MuxSceneJob, PollGenerationJob, QueueJob,
    SubmitGenerationJob,
};
pub use memory::MemoryTaskQueue;
pub use queue::{JobQueue, QueueConfig, TaskSink};
