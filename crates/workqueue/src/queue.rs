//! # De-duplicating FIFO
//!
//! The basic work queue. Items are pending at most once (`dirty` set) and are
//! never handed to two callers at the same time (`processing` set). An item
//! added while it is being processed is re-queued when `done` is called for it.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug)]
struct State<T> {
    /// Pending items in processing order
    queue: VecDeque<T>,
    /// Items that need processing
    dirty: HashSet<T>,
    /// Items handed out by `get` and not yet `done`
    processing: HashSet<T>,
    shutting_down: bool,
}

/// De-duplicating FIFO work queue.
pub struct Queue<T> {
    name: String,
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<T> Queue<T>
where
    T: Clone + Eq + Hash + fmt::Debug,
{
    /// Create a new, empty queue. The name only appears in log output.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark an item as needing processing.
    ///
    /// Adding an item that is already pending is a no-op. Adding an item that
    /// is currently being processed defers it until `done` is called.
    pub fn add(&self, item: T) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                trace!(queue = %self.name, ?item, "Dropping add on shut down queue");
                return;
            }
            if !state.dirty.insert(item.clone()) {
                return;
            }
            if state.processing.contains(&item) {
                return;
            }
            state.queue.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Wait for the next item to process.
    ///
    /// Returns `None` once the queue has been shut down and every pending
    /// item has been handed out.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add or
            // shutdown between the check and the await is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark an item as done processing.
    ///
    /// If the item was added again while it was being processed, it goes back
    /// on the queue.
    pub fn done(&self, item: &T) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(item);
            if state.dirty.contains(item) {
                state.queue.push_back(item.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Number of items waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether no items are waiting to be handed out
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting new items and wake every blocked `get`.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Whether `shut_down` has been called
    pub fn shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}
