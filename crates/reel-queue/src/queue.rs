//! Task queue using Redis Streams, with a sorted-set delay queue in front.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for tasks
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Sorted set holding tasks scheduled for later
    pub delayed_set_name: String,
    /// Max retries before DLQ
    pub max_retries: u32,
    /// Task visibility timeout
    pub visibility_timeout: Duration,
    /// How long an idempotency key blocks duplicates
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reel:tasks".to_string(),
            consumer_group: "reel:workers".to_string(),
            dlq_stream_name: "reel:dlq".to_string(),
            delayed_set_name: "reel:delayed".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600),
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            delayed_set_name: std::env::var("QUEUE_DELAYED_SET")
                .unwrap_or(defaults.delayed_set_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            dedup_ttl: Duration::from_secs(
                std::env::var("QUEUE_DEDUP_TTL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
        }
    }
}

/// Producer side of the queue, shared by the API and the worker.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Enqueue for immediate delivery. Returns `None` when a task with the
    /// same idempotency key is already queued.
    async fn enqueue(&self, job: QueueJob) -> QueueResult<Option<String>>;

    /// Schedule for delivery after `delay`.
    async fn enqueue_after(&self, job: QueueJob, delay: Duration) -> QueueResult<()>;
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Round-trip to Redis for readiness checks.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn dedup_key(idempotency_key: &str) -> String {
        format!("reel:dedup:{}", idempotency_key)
    }

    /// Reserve the task's idempotency key. False when already held.
    async fn reserve_dedup(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &QueueJob,
    ) -> QueueResult<bool> {
        let Some(key) = job.idempotency_key() else {
            return Ok(true);
        };
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::dedup_key(&key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async(conn)
            .await?;
        if reply.is_none() {
            debug!("Duplicate task dropped: {}", key);
        }
        Ok(reply.is_some())
    }

    async fn push(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        payload: &str,
    ) -> QueueResult<String> {
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(payload)
            .query_async(conn)
            .await?;
        Ok(message_id)
    }

    /// Release the idempotency key so the same task can be queued again.
    pub async fn clear_dedup(&self, job: &QueueJob) -> QueueResult<()> {
        let Some(key) = job.idempotency_key() else {
            return Ok(());
        };
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(Self::dedup_key(&key)).await?;
        Ok(())
    }

    /// Acknowledge a task (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(Self::retry_key(message_id)).await?;

        debug!("Acknowledged task: {}", message_id);
        Ok(())
    }

    /// Move a task to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!("Moved task {} ({}) to DLQ: {}", job.job_id(), job.job_type(), error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Number of tasks waiting in the delay queue.
    pub async fn delayed_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.zcard(&self.config.delayed_set_name).await?;
        Ok(len)
    }

    fn parse_entries(&self, entries: Vec<redis::streams::StreamId>) -> (Vec<(String, QueueJob)>, Vec<String>) {
        let mut jobs = Vec::new();
        let mut malformed = Vec::new();

        for entry in entries {
            let message_id = entry.id.clone();
            match entry.map.get("job") {
                Some(redis::Value::BulkString(payload)) => {
                    let payload_str = String::from_utf8_lossy(payload);
                    match serde_json::from_str::<QueueJob>(&payload_str) {
                        Ok(job) => jobs.push((message_id, job)),
                        Err(e) => {
                            warn!("Failed to parse task payload {}: {}", message_id, e);
                            malformed.push(message_id);
                        }
                    }
                }
                _ => malformed.push(message_id),
            }
        }

        (jobs, malformed)
    }

    /// Consume new tasks from the queue.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.connection().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(result) = result else {
            return Ok(Vec::new());
        };

        let entries = result.keys.into_iter().flat_map(|k| k.ids).collect();
        let (jobs, malformed) = self.parse_entries(entries);
        for message_id in malformed {
            // Malformed payloads would be redelivered forever.
            self.ack(&message_id).await.ok();
        }

        if !jobs.is_empty() {
            debug!("Consumed {} tasks from stream", jobs.len());
        }
        Ok(jobs)
    }

    /// Claim pending tasks that have been idle for too long. This picks up
    /// tasks from crashed workers and failed tasks awaiting retry.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.connection().await?;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for id in &pending.ids {
            cmd.arg(&id.id);
        }
        let result: redis::streams::StreamClaimReply = cmd.query_async(&mut conn).await?;

        let (jobs, malformed) = self.parse_entries(result.ids);
        for message_id in malformed {
            self.ack(&message_id).await.ok();
        }
        for (_, job) in &jobs {
            info!("Claimed pending task {} ({})", job.job_id(), job.job_type());
        }
        Ok(jobs)
    }

    fn retry_key(message_id: &str) -> String {
        format!("reel:retry:{}", message_id)
    }

    /// Get retry count for a task.
    pub async fn get_retry_count(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;
        let count: Option<u32> = conn.get(Self::retry_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Increment retry count for a task.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;
        let key = Self::retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    /// Get max retries from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Move due delayed tasks into the stream. Returns how many moved.
    ///
    /// Safe to run from several workers at once: only the caller whose
    /// `ZREM` removed a member pushes it.
    pub async fn promote_due(&self, limit: usize) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let now_ms = Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore_limit(
                &self.config.delayed_set_name,
                "-inf",
                now_ms,
                0,
                limit as isize,
            )
            .await?;

        let mut promoted = 0;
        for member in due {
            let removed: i64 = conn.zrem(&self.config.delayed_set_name, &member).await?;
            if removed == 0 {
                continue;
            }
            self.push(&mut conn, &member).await?;
            promoted += 1;
        }

        if promoted > 0 {
            debug!("Promoted {} delayed tasks", promoted);
        }
        Ok(promoted)
    }
}

#[async_trait]
impl TaskSink for JobQueue {
    async fn enqueue(&self, job: QueueJob) -> QueueResult<Option<String>> {
        let mut conn = self.connection().await?;
        if !self.reserve_dedup(&mut conn, &job).await? {
            return Ok(None);
        }

        let payload = serde_json::to_string(&job)?;
        let message_id = self.push(&mut conn, &payload).await?;

        info!(
            "Enqueued task {} ({}) with message ID {}",
            job.job_id(),
            job.job_type(),
            message_id
        );
        Ok(Some(message_id))
    }

    async fn enqueue_after(&self, job: QueueJob, delay: Duration) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        if !self.reserve_dedup(&mut conn, &job).await? {
            return Ok(());
        }

        let payload = serde_json::to_string(&job)?;
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        conn.zadd::<_, _, _, ()>(&self.config.delayed_set_name, &payload, due_ms)
            .await?;

        debug!(
            "Scheduled task {} ({}) in {:?}",
            job.job_id(),
            job.job_type(),
            delay
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        std::env::remove_var("QUEUE_STREAM");
        std::env::remove_var("QUEUE_DELAYED_SET");
        std::env::remove_var("QUEUE_MAX_RETRIES");
        let config = QueueConfig::from_env();
        assert_eq!(config.stream_name, "reel:tasks");
        assert_eq!(config.delayed_set_name, "reel:delayed");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    #[serial]
    fn test_config_from_env_overrides() {
        std::env::set_var("QUEUE_MAX_RETRIES", "7");
        std::env::set_var("QUEUE_DELAYED_SET", "custom:delayed");
        let config = QueueConfig::from_env();
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.delayed_set_name, "custom:delayed");
        std::env::remove_var("QUEUE_MAX_RETRIES");
        std::env::remove_var("QUEUE_DELAYED_SET");
    }
}
