//! Pipeline event sink.
//!
//! Events go out on Redis pub/sub, one channel per project. Delivery to end
//! users happens elsewhere; this is fire-and-forget.

use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use reel_models::{EventEnvelope, PipelineEvent, ProjectId};

use crate::error::{QueueError, QueueResult};

/// Destination for pipeline events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, envelope: EventEnvelope) -> QueueResult<()>;
}

/// Wrap an event and emit it.
pub async fn emit_event(
    sink: &dyn EventSink,
    project_id: &ProjectId,
    event: PipelineEvent,
) -> QueueResult<()> {
    sink.emit(EventEnvelope::new(project_id.clone(), event)).await
}

/// Publishes events to `reel:events:{project}`.
pub struct RedisEventSink {
    client: redis::Client,
}

impl RedisEventSink {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a project.
    pub fn channel_name(project_id: &ProjectId) -> String {
        format!("reel:events:{}", project_id)
    }

    /// Subscribe to a project's events.
    pub async fn subscribe(
        &self,
        project_id: &ProjectId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = EventEnvelope> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(project_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl EventSink for RedisEventSink {
    async fn emit(&self, envelope: EventEnvelope) -> QueueResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;
        let channel = Self::channel_name(&envelope.project_id);
        let payload = serde_json::to_string(&envelope)?;

        debug!(
            event_type = envelope.event.event_type(),
            "Publishing event to {}", channel
        );
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events of one type, by [`PipelineEvent::event_type`].
    pub fn of_type(&self, event_type: &str) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event.event_type() == event_type)
            .map(|e| e.event)
            .collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, envelope: EventEnvelope) -> QueueResult<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(envelope);
        }
        Ok(())
    }
}
