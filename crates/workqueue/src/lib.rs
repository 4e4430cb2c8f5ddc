//! Controller Work Queue
//!
//! A de-duplicating FIFO of object keys with per-item rate limiting, used to
//! decouple watch event delivery from reconciliation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use workqueue::{RateLimitingQueue, default_controller_rate_limiter};
//!
//! # async fn example() {
//! let queue = Arc::new(RateLimitingQueue::new("HADeployment", default_controller_rate_limiter()));
//!
//! queue.add("default/web".to_string());
//! queue.add("default/web".to_string()); // collapses into the pending entry
//!
//! if let Some(key) = queue.get().await {
//!     // ... process key ...
//!     queue.forget(&key);
//!     queue.done(&key);
//! }
//! # }
//! ```
//!
//! # Features
//!
//! - **De-duplication**: an item is pending at most once
//! - **Exclusive processing**: an item is never handed to two workers at once
//! - **Rate-limited requeue**: exponential per-item backoff via `add_rate_limited`
//! - **Shutdown**: `shut_down` wakes every blocked `get`

pub mod queue;
pub mod rate_limiter;
pub mod rate_limiting_queue;

pub use queue::Queue;
pub use rate_limiter::{ItemExponentialFailureRateLimiter, RateLimiter, default_controller_rate_limiter};
pub use rate_limiting_queue::RateLimitingQueue;
