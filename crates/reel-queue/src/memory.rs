//! In-process task queue for tests and local runs.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::job::QueueJob;
use crate::queue::TaskSink;

#[derive(Default)]
struct Inner {
    ready: VecDeque<QueueJob>,
    delayed: Vec<(Duration, QueueJob)>,
    dedup: HashSet<String>,
    next_id: u64,
}

/// FIFO queue with the same deduplication rule as the Redis queue.
///
/// Delayed tasks are held apart and released by [`MemoryTaskQueue::release_delayed`]
/// so tests control time explicitly.
#[derive(Default)]
pub struct MemoryTaskQueue {
    inner: Mutex<Inner>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pop the next ready task.
    pub fn pop(&self) -> Option<QueueJob> {
        self.lock().ready.pop_front()
    }

    /// Mark a task done, releasing its idempotency key.
    pub fn ack(&self, job: &QueueJob) {
        if let Some(key) = job.idempotency_key() {
            self.lock().dedup.remove(&key);
        }
    }

    /// Move every delayed task to the ready queue. Returns how many moved.
    pub fn release_delayed(&self) -> usize {
        let mut inner = self.lock();
        let delayed = std::mem::take(&mut inner.delayed);
        let count = delayed.len();
        inner.ready.extend(delayed.into_iter().map(|(_, job)| job));
        count
    }

    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.lock().delayed.len()
    }

    /// Snapshot of ready tasks, in delivery order.
    pub fn ready(&self) -> Vec<QueueJob> {
        self.lock().ready.iter().cloned().collect()
    }

    /// Snapshot of delayed tasks with their requested delay.
    pub fn delayed(&self) -> Vec<(Duration, QueueJob)> {
        self.lock().delayed.clone()
    }
}

#[async_trait]
impl TaskSink for MemoryTaskQueue {
    async fn enqueue(&self, job: QueueJob) -> QueueResult<Option<String>> {
        let mut inner = self.lock();
        if let Some(key) = job.idempotency_key() {
            if !inner.dedup.insert(key) {
                return Ok(None);
            }
        }
        inner.next_id += 1;
        let id = format!("{}-0", inner.next_id);
        inner.ready.push_back(job);
        Ok(Some(id))
    }

    async fn enqueue_after(&self, job: QueueJob, delay: Duration) -> QueueResult<()> {
        let mut inner = self.lock();
        if let Some(key) = job.idempotency_key() {
            if !inner.dedup.insert(key) {
                return Ok(());
            }
        }
        inner.delayed.push((delay, job));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{PollGenerationJob, SubmitGenerationJob};
    use reel_models::{ProjectId, SceneId, SubResourceKind};

    fn submit(scene: &str) -> QueueJob {
        QueueJob::SubmitGeneration(SubmitGenerationJob::new(
            ProjectId::from("p1"),
            SceneId::from(scene),
            SubResourceKind::Video,
        ))
    }

    #[tokio::test]
    async fn test_duplicate_submit_dropped_until_ack() {
        let queue = MemoryTaskQueue::new();
        assert!(queue.enqueue(submit("sc1")).await.unwrap().is_some());
        assert!(queue.enqueue(submit("sc1")).await.unwrap().is_none());
        assert!(queue.enqueue(submit("sc2")).await.unwrap().is_some());
        assert_eq!(queue.ready_len(), 2);

        let first = queue.pop().unwrap();
        queue.ack(&first);
        assert!(queue.enqueue(submit("sc1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delayed_tasks_held_until_released() {
        let queue = MemoryTaskQueue::new();
        let poll = QueueJob::PollGeneration(PollGenerationJob::new(
            ProjectId::from("p1"),
            SceneId::from("sc1"),
            SubResourceKind::Video,
        ));
        queue
            .enqueue_after(poll.clone(), Duration::from_secs(10))
            .await
            .unwrap();
        queue
            .enqueue_after(poll.clone(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(queue.ready_len(), 0);
        assert_eq!(queue.delayed_len(), 2);
        assert_eq!(queue.release_delayed(), 2);
        assert_eq!(queue.pop(), Some(poll));
    }
}
