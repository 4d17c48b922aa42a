//! Work queue: a bounded, in-process, two-priority FIFO queue with
//! blocking dequeue and cooperative cancellation.
//!
//! Two `tokio::sync::Mutex<VecDeque<JobId>>` deques guarded by a shared
//! `tokio::sync::Semaphore` for bounded capacity, with a `Notify` to wake
//! blocked dequeuers. Single-process only, no durable cross-process broker
//! sits behind it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, Semaphore};

use super::clock::JobId;
use super::job::Priority;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is at capacity")]
    Full,
    #[error("queue is shut down")]
    ShutDown,
}

struct QueueInner {
    standard: Mutex<VecDeque<JobId>>,
    low: Mutex<VecDeque<JobId>>,
    capacity: Semaphore,
    notify: Notify,
    shutdown: AtomicBool,
}

/// Shared handle to the bounded priority queue. Cheaply `Clone`able.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                standard: Mutex::new(VecDeque::new()),
                low: Mutex::new(VecDeque::new()),
                capacity: Semaphore::new(capacity),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Fails fast with `QueueError::Full` rather than blocking or silently
    /// dropping: never blocks on worker progress. `async` only to take the
    /// (never-contended-for-long) deque lock; it never waits on queue
    /// *space* becoming available.
    pub async fn enqueue(&self, job_id: JobId, priority: Priority) -> Result<(), QueueError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(QueueError::ShutDown);
        }
        let permit = self
            .inner
            .capacity
            .try_acquire()
            .map_err(|_| QueueError::Full)?;
        permit.forget(); // released again in `try_pop`

        let mut deque = match priority {
            Priority::Standard => self.inner.standard.lock().await,
            Priority::Low => self.inner.low.lock().await,
        };
        deque.push_back(job_id);
        drop(deque);
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Blocks until an item is available or `cancel` resolves. `standard`
    /// drains before `low` (strict priority); FIFO within a class.
    pub async fn dequeue(&self, cancel: impl std::future::Future<Output = ()>) -> Option<JobId> {
        tokio::pin!(cancel);
        loop {
            if let Some(id) = self.try_pop().await {
                self.inner.capacity.add_permits(1);
                return Some(id);
            }
            if self.inner.shutdown.load(Ordering::Acquire) {
                return None;
            }
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = &mut cancel => return None,
            }
        }
    }

    async fn try_pop(&self) -> Option<JobId> {
        {
            let mut standard = self.inner.standard.lock().await;
            if let Some(id) = standard.pop_front() {
                return Some(id);
            }
        }
        let mut low = self.inner.low.lock().await;
        low.pop_front()
    }

    pub async fn length(&self) -> (usize, usize) {
        let standard = self.inner.standard.lock().await.len();
        let low = self.inner.low.lock().await.len();
        (standard, low)
    }

    /// Stops accepting dequeues and wakes every blocked waiter so pool
    /// shutdown can proceed.
    pub fn shut_down(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;

    #[tokio::test]
    async fn enqueue_then_dequeue_roundtrip() {
        let queue = WorkQueue::new(4);
        let id = JobId::new_v4();
        queue.enqueue(id, Priority::Standard).await.unwrap();
        let got = queue.dequeue(pending()).await;
        assert_eq!(got, Some(id));
    }

    #[tokio::test]
    async fn standard_drains_before_low() {
        let queue = WorkQueue::new(4);
        let low_id = JobId::new_v4();
        let standard_id = JobId::new_v4();
        queue.enqueue(low_id, Priority::Low).await.unwrap();
        queue.enqueue(standard_id, Priority::Standard).await.unwrap();

        let first = queue.dequeue(pending()).await.unwrap();
        let second = queue.dequeue(pending()).await.unwrap();
        assert_eq!(first, standard_id);
        assert_eq!(second, low_id);
    }

    #[tokio::test]
    async fn fifo_within_priority_class() {
        let queue = WorkQueue::new(4);
        let a = JobId::new_v4();
        let b = JobId::new_v4();
        queue.enqueue(a, Priority::Standard).await.unwrap();
        queue.enqueue(b, Priority::Standard).await.unwrap();

        assert_eq!(queue.dequeue(pending()).await, Some(a));
        assert_eq!(queue.dequeue(pending()).await, Some(b));
    }

    #[tokio::test]
    async fn enqueue_fails_when_full() {
        let queue = WorkQueue::new(1);
        queue.enqueue(JobId::new_v4(), Priority::Standard).await.unwrap();
        let err = queue.enqueue(JobId::new_v4(), Priority::Standard).await;
        assert!(matches!(err, Err(QueueError::Full)));
    }

    #[tokio::test]
    async fn dequeue_after_pop_reclaims_capacity() {
        let queue = WorkQueue::new(1);
        let id = JobId::new_v4();
        queue.enqueue(id, Priority::Standard).await.unwrap();
        assert!(matches!(
            queue.enqueue(JobId::new_v4(), Priority::Standard).await,
            Err(QueueError::Full)
        ));
        queue.dequeue(pending()).await;
        queue.enqueue(JobId::new_v4(), Priority::Standard).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_unblocks_dequeue() {
        let queue = WorkQueue::new(4);
        let q2 = queue.clone();
        let handle = tokio::spawn(async move { q2.dequeue(pending()).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.shut_down();
        let result = handle.await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn length_reports_both_classes() {
        let queue = WorkQueue::new(4);
        queue.enqueue(JobId::new_v4(), Priority::Standard).await.unwrap();
        queue.enqueue(JobId::new_v4(), Priority::Low).await.unwrap();
        assert_eq!(queue.length().await, (1, 1));
    }
}
