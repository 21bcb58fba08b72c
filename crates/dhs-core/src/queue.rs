//! Unbounded FIFO with a timeout-bounded async `fetch`.
//!
//! Used for inbound/outbound message queues and transport-internal handoff.
//! There is no capacity limit: a stalled consumer grows the queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

/// Returned by [`BlockingQueue::fetch`] when the wait elapses with nothing queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue fetch timed out")]
pub struct QueueTimeout;

/// Side effect run synchronously on every enqueue, after the item is queued.
pub trait EnqueueObserver<T>: Send + Sync {
    fn on_enqueue(&self, item: &T);
}

pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
    observer: Option<Arc<dyn EnqueueObserver<T>>>,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            observer: None,
        }
    }

    pub fn with_observer(observer: Arc<dyn EnqueueObserver<T>>) -> Self {
        Self {
            observer: Some(observer),
            ..Self::new()
        }
    }

    /// Append an item and wake one waiter. Never blocks.
    pub fn enqueue(&self, item: T) {
        {
            let mut items = self.lock();
            items.push_back(item);
            if let Some(observer) = &self.observer {
                if let Some(queued) = items.back() {
                    observer.on_enqueue(queued);
                }
            }
        }
        self.available.notify_one();
    }

    /// Put a fetched item back at the head, ahead of everything queued since.
    /// The observer does not run again.
    pub fn requeue_front(&self, item: T) {
        self.lock().push_front(item);
        self.available.notify_one();
    }

    /// Wait up to `timeout` for the oldest item.
    pub async fn fetch(&self, timeout: Duration) -> Result<T, QueueTimeout> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue in between is not missed.
            notified.as_mut().enable();

            if let Some(item) = self.lock().pop_front() {
                return Ok(item);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(QueueTimeout);
            }
        }
    }

    /// Take the oldest item without waiting.
    pub fn try_fetch(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Drop every pending item.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        // A panic while holding this lock cannot leave the deque inconsistent.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
