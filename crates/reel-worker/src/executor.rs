//! Task executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use reel_queue::{JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::Pipeline;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

const CLAIM_BATCH: usize = 5;
const CONSUME_BATCH: usize = 5;
const PROMOTE_BATCH: usize = 100;

/// Consumes tasks from the stream and runs them with bounded concurrency.
pub struct JobExecutor {
    config: WorkerConfig,
    pipeline: Pipeline,
    queue: Arc<JobQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(pipeline: Pipeline, queue: Arc<JobQueue>) -> Self {
        let config = pipeline.context().config.clone();
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            pipeline,
            queue,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Run until [`JobExecutor::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting task executor '{}' with {} max concurrent tasks",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let claim_task = self.spawn_claim_loop();
        let promote_task = self.spawn_promote_loop();

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming tasks: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        promote_task.abort();

        info!("Waiting for in-flight tasks to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout after {}s; unfinished tasks will be reclaimed",
                self.config.shutdown_timeout.as_secs()
            );
        }

        info!("Task executor stopped");
        Ok(())
    }

    /// Periodically take over tasks left pending by crashed or failed attempts.
    fn spawn_claim_loop(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let pipeline = self.pipeline.clone();
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;
        let job_timeout = self.config.job_timeout;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue.claim_pending(&consumer_name, min_idle_ms, CLAIM_BATCH).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending tasks", jobs.len());
                                for (message_id, job) in jobs {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        break;
                                    };
                                    let pipeline = pipeline.clone();
                                    let queue = Arc::clone(&queue);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(pipeline, queue, job_timeout, message_id, job).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending tasks: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Move due delayed tasks (polls, backoffs) into the stream.
    fn spawn_promote_loop(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let promote_interval = self.config.promote_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(promote_interval);
            let mut failures = FailureTracker::new(3);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue.promote_due(PROMOTE_BATCH).await {
                            Ok(promoted) => {
                                failures.record_success();
                                if promoted > 0 {
                                    debug!("Promoted {} delayed tasks", promoted);
                                }
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to promote delayed tasks: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(CONSUME_BATCH))
            .await?;
        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} tasks from queue", jobs.len());
        for (message_id, job) in jobs {
            let pipeline = self.pipeline.clone();
            let queue = Arc::clone(&self.queue);
            let job_timeout = self.config.job_timeout;
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(pipeline, queue, job_timeout, message_id, job).await;
            });
        }
        metrics::set_tasks_in_flight(self.config.max_concurrent_jobs - self.job_semaphore.available_permits());
        Ok(())
    }

    /// Run one task with timeout, retry accounting and dead-lettering.
    async fn execute_job(
        pipeline: Pipeline,
        queue: Arc<JobQueue>,
        job_timeout: Duration,
        message_id: String,
        job: QueueJob,
    ) {
        let logger = JobLogger::new(&job);
        let span = logger.create_span();
        let started = Instant::now();

        let result = match tokio::time::timeout(job_timeout, pipeline.process_job(&job))
            .instrument(span)
            .await
        {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(job_timeout.as_secs())),
        };

        match result {
            Ok(()) => {
                metrics::record_task(job.job_type(), "success", started.elapsed());
                Self::ack_with_retry(&queue, &message_id).await;
                if let Err(e) = queue.clear_dedup(&job).await {
                    warn!("Failed to clear dedup key for task {}: {}", job.job_id(), e);
                }
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                let retry_count = queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                let max_retries = queue.max_retries();

                if !e.is_retryable() || retry_count >= max_retries {
                    metrics::record_task(job.job_type(), "dead_letter", started.elapsed());
                    warn!(
                        "Task {} failed permanently after {} attempts, moving to DLQ",
                        job.job_id(),
                        retry_count.min(max_retries)
                    );
                    if let Err(dlq_err) = queue.dlq(&message_id, &job, &e.to_string()).await {
                        error!("Failed to move task {} to DLQ: {}", job.job_id(), dlq_err);
                    }
                    if let Err(e) = queue.clear_dedup(&job).await {
                        warn!("Failed to clear dedup key for task {}: {}", job.job_id(), e);
                    }
                    if let Err(handler_err) = pipeline.handle_dead_letter(&job, &e.to_string()).await {
                        error!("Dead-letter handling for task {} failed: {}", job.job_id(), handler_err);
                    }
                } else {
                    metrics::record_task(job.job_type(), "retry", started.elapsed());
                    info!(
                        "Task {} will be retried (attempt {}/{})",
                        job.job_id(),
                        retry_count,
                        max_retries
                    );
                }
            }
        }
    }

    async fn ack_with_retry(queue: &JobQueue, message_id: &str) {
        let config = RetryConfig::new("ack").with_max_retries(2);
        let result = retry_async(&config, |e: &reel_queue::QueueError| e.is_retryable(), || {
            queue.ack(message_id)
        })
        .await;
        if let Err(e) = result {
            error!("Failed to ack task {}: {}", message_id, e);
        }
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
