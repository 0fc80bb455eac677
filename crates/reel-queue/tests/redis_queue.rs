//! Round trips against a live Redis (`REDIS_URL`).

use std::time::Duration;

use reel_models::{ProjectId, SceneId, SubResourceKind};
use reel_queue::{JobQueue, PollGenerationJob, QueueConfig, QueueJob, SubmitGenerationJob, TaskSink};

fn test_queue() -> JobQueue {
    let suffix = uuid::Uuid::new_v4();
    let config = QueueConfig {
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
        stream_name: format!("reel:test:{}:tasks", suffix),
        consumer_group: format!("reel:test:{}:workers", suffix),
        dlq_stream_name: format!("reel:test:{}:dlq", suffix),
        delayed_set_name: format!("reel:test:{}:delayed", suffix),
        ..QueueConfig::default()
    };
    JobQueue::new(config).unwrap()
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn enqueue_consume_ack() {
    let queue = test_queue();
    queue.init().await.unwrap();

    let job = QueueJob::SubmitGeneration(SubmitGenerationJob::new(
        ProjectId::from("p1"),
        SceneId::new(),
        SubResourceKind::Video,
    ));
    assert!(queue.enqueue(job.clone()).await.unwrap().is_some());
    assert!(queue.enqueue(job.clone()).await.unwrap().is_none());

    let consumed = queue.consume("test-consumer", 100, 10).await.unwrap();
    assert_eq!(consumed.len(), 1);
    assert_eq!(consumed[0].1, job);

    queue.ack(&consumed[0].0).await.unwrap();
    queue.clear_dedup(&job).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn delayed_task_promoted_when_due() {
    let queue = test_queue();
    queue.init().await.unwrap();

    let poll = PollGenerationJob::new(ProjectId::from("p1"), SceneId::new(), SubResourceKind::Video);
    let job = QueueJob::PollGeneration(poll.clone());
    queue.enqueue_after(job.clone(), Duration::ZERO).await.unwrap();
    queue
        .enqueue_after(QueueJob::PollGeneration(poll.next()), Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(queue.promote_due(10).await.unwrap(), 1);
    assert_eq!(queue.delayed_len().await.unwrap(), 1);

    let consumed = queue.consume("test-consumer", 100, 10).await.unwrap();
    assert_eq!(consumed.len(), 1);
    assert_eq!(consumed[0].1, job);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn failed_task_reclaimed_then_dead_lettered() {
    let queue = test_queue();
    queue.init().await.unwrap();

    let job = QueueJob::SubmitGeneration(SubmitGenerationJob::new(
        ProjectId::from("p1"),
        SceneId::new(),
        SubResourceKind::Audio,
    ));
    queue.enqueue(job.clone()).await.unwrap();
    let consumed = queue.consume("crashed", 100, 1).await.unwrap();
    let message_id = consumed[0].0.clone();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let claimed = queue.claim_pending("rescuer", 10, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].0, message_id);

    assert_eq!(queue.increment_retry(&message_id).await.unwrap(), 1);
    queue.dlq(&message_id, &job, "boom").await.unwrap();
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
}
