//! # Per-item Rate Limiting
//!
//! Decides how long an item has to wait before it is re-queued after a failed
//! attempt. The exponential limiter doubles the delay for every consecutive
//! failure of the same item, starting at `base_delay` and capped at `max_delay`.
//!
//! Default sequence for controllers: 5ms, 10ms, 20ms, 40ms, ... 1000s (max).

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Base delay of the default controller rate limiter
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Maximum delay of the default controller rate limiter
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Decides the requeue delay for an item.
pub trait RateLimiter<T>: Send + Sync {
    /// Record a failure for `item` and return how long it should wait.
    fn when(&self, item: &T) -> Duration;

    /// Stop tracking `item`, resetting its failure count.
    fn forget(&self, item: &T);

    /// Number of failures recorded for `item` since it was last forgotten.
    fn num_requeues(&self, item: &T) -> u32;
}

/// Exponential backoff per item: `base_delay * 2^failures`, capped at `max_delay`.
pub struct ItemExponentialFailureRateLimiter<T> {
    failures: Mutex<HashMap<T, u32>>,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> fmt::Debug for ItemExponentialFailureRateLimiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemExponentialFailureRateLimiter")
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl<T> ItemExponentialFailureRateLimiter<T>
where
    T: Eq + Hash + Clone,
{
    /// Create a limiter with the given base and maximum delays.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base_delay,
            max_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<T, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calculate the delay for a given number of previous failures (stateless).
    ///
    /// `failures == 0` yields `base_delay`; every further failure doubles it.
    /// Overflow saturates to `max_delay`.
    #[must_use]
    pub fn backoff_for(failures: u32, base_delay: Duration, max_delay: Duration) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| base_delay.checked_mul(factor))
            .map_or(max_delay, |delay| delay.min(max_delay))
    }
}

impl<T> RateLimiter<T> for ItemExponentialFailureRateLimiter<T>
where
    T: Eq + Hash + Clone + Send,
{
    fn when(&self, item: &T) -> Duration {
        let mut failures = self.lock();
        let count = failures.entry(item.clone()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        Self::backoff_for(previous, self.base_delay, self.max_delay)
    }

    fn forget(&self, item: &T) {
        self.lock().remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.lock().get(item).copied().unwrap_or(0)
    }
}

/// The rate limiter controllers use unless configured otherwise:
/// exponential per-item backoff from 5ms up to 1000s.
#[must_use]
pub fn default_controller_rate_limiter<T>() -> Box<dyn RateLimiter<T>>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    Box::new(ItemExponentialFailureRateLimiter::new(
        DEFAULT_BASE_DELAY,
        DEFAULT_MAX_DELAY,
    ))
}
