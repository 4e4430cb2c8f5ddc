//! # Rate-limited Work Queue
//!
//! Wraps [`Queue`] with delayed adds and a [`RateLimiter`], so that failed
//! items can be requeued with per-item backoff.

use crate::queue::Queue;
use crate::rate_limiter::RateLimiter;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Named work queue with per-item rate-limited requeue.
pub struct RateLimitingQueue<T> {
    queue: Queue<T>,
    rate_limiter: Box<dyn RateLimiter<T>>,
}

impl<T> fmt::Debug for RateLimitingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitingQueue")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    /// Create a named queue using the given rate limiter.
    pub fn new(name: impl Into<String>, rate_limiter: Box<dyn RateLimiter<T>>) -> Self {
        Self {
            queue: Queue::new(name),
            rate_limiter,
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Mark an item as needing processing. See [`Queue::add`].
    pub fn add(&self, item: T) {
        self.queue.add(item);
    }

    /// Wait for the next item. `None` means the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    /// Mark an item as done processing. See [`Queue::done`].
    pub fn done(&self, item: &T) {
        self.queue.done(item);
    }

    /// Reset the item's failure count. Does not remove it from the queue.
    pub fn forget(&self, item: &T) {
        self.rate_limiter.forget(item);
    }

    /// Number of rate-limited requeues recorded for the item
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.rate_limiter.num_requeues(item)
    }

    /// Add the item once `delay` has elapsed.
    ///
    /// The add is dropped if the queue is shut down before the delay expires.
    /// Must be called from within a Tokio runtime when `delay` is non-zero.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if self.queue.shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.queue.add(item);
            return;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.queue.add(item);
        });
    }

    /// Add the item after the delay its rate limiter decides.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.rate_limiter.when(&item);
        debug!(queue = %self.name(), ?item, ?delay, "Requeueing with backoff");
        self.add_after(item, delay);
    }

    /// Number of items waiting to be handed out
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no items are waiting to be handed out
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Stop accepting new items and wake every blocked `get`.
    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    /// Whether `shut_down` has been called
    pub fn shutting_down(&self) -> bool {
        self.queue.shutting_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::{ItemExponentialFailureRateLimiter, default_controller_rate_limiter};

    fn test_queue() -> Arc<RateLimitingQueue<String>> {
        Arc::new(RateLimitingQueue::new(
            "test",
            Box::new(ItemExponentialFailureRateLimiter::new(
                Duration::from_millis(100),
                Duration::from_secs(10),
            )),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_delivers_after_backoff() {
        let queue = test_queue();
        let key = "default/web".to_string();

        queue.add_rate_limited(key.clone());
        assert!(queue.is_empty());
        assert_eq!(queue.num_requeues(&key), 1);

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(queue.get().await, Some(key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_backs_off_exponentially() {
        let queue = test_queue();
        let key = "default/web".to_string();

        queue.add_rate_limited(key.clone());
        queue.add_rate_limited(key.clone());
        assert_eq!(queue.num_requeues(&key), 2);

        // First add (100ms) lands, the second (200ms) collapses into it
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_forget_resets_requeues() {
        let queue = test_queue();
        let key = "default/web".to_string();

        queue.add_rate_limited(key.clone());
        queue.forget(&key);

        assert_eq!(queue.num_requeues(&key), 0);
    }

    #[tokio::test]
    async fn test_add_after_zero_delay_is_immediate() {
        let queue = Arc::new(RateLimitingQueue::new("test", default_controller_rate_limiter()));

        queue.add_after(1u32, Duration::ZERO);

        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_add_dropped_after_shut_down() {
        let queue = test_queue();

        queue.add_after("default/web".to_string(), Duration::from_millis(50));
        queue.shut_down();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }
}
