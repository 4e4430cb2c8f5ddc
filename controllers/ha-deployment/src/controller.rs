//! Main controller implementation.
//!
//! This module contains the `Controller` struct that connects the informer
//! to the work queue and drains the queue with a single worker.
//!
//! Flow: watch stream -> informer (cache + add handler) -> work queue ->
//! worker -> lister lookup -> reconciler -> event recorder -> queue release.

use crate::error::ControllerError;
use crate::informer::{CacheSynced, Informer, ResourceEventHandlerFuncs};
use crate::key::{meta_namespace_key, split_meta_namespace_key};
use crate::lister::Lister;
use crate::reconciler::Reconciler;
use crds::HADeployment;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use workqueue::RateLimitingQueue;

/// Worker loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Pause before the worker is restarted after it stops draining
    pub period: Duration,
    /// Give up waiting for the initial cache sync after this long
    pub cache_sync_timeout: Option<Duration>,
    /// Requeue failed keys with backoff instead of dropping them
    pub requeue_on_error: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            cache_sync_timeout: None,
            requeue_on_error: false,
        }
    }
}

/// Releases a dequeued key on every exit path.
///
/// Always marks the key done; additionally either forgets its backoff or,
/// when `requeue` is set, requeues it with backoff.
struct QueueItemGuard<'a> {
    queue: &'a Arc<RateLimitingQueue<String>>,
    key: String,
    requeue: bool,
}

impl Drop for QueueItemGuard<'_> {
    fn drop(&mut self) {
        if self.requeue {
            self.queue.add_rate_limited(self.key.clone());
        } else {
            self.queue.forget(&self.key);
        }
        self.queue.done(&self.key);
    }
}

/// Main controller for HADeployment management.
pub struct Controller {
    queue: Arc<RateLimitingQueue<String>>,
    lister: Lister<HADeployment>,
    synced: CacheSynced<HADeployment>,
    reconciler: Reconciler,
    config: WorkerConfig,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller and registers its add handler on `informer`.
    ///
    /// The handler only translates the object into its key and enqueues it.
    pub fn new(
        queue: Arc<RateLimitingQueue<String>>,
        informer: &mut Informer<HADeployment>,
        reconciler: Reconciler,
        config: WorkerConfig,
    ) -> Self {
        let handler_queue = Arc::clone(&queue);
        informer.add_event_handler(
            ResourceEventHandlerFuncs::default()
                .on_add(move |obj: &Arc<HADeployment>| enqueue_added(&handler_queue, obj)),
        );

        Self {
            queue,
            lister: informer.lister(),
            synced: informer.synced(),
            reconciler,
            config,
        }
    }

    /// Runs the controller until `shutdown` fires.
    ///
    /// Waits for the cache to sync (a failed wait is only logged), starts the
    /// worker, and on shutdown stops the queue and waits for the worker.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), ControllerError> {
        info!("HADeployment Controller running");

        if self
            .synced
            .wait_for_cache_sync(&shutdown, self.config.cache_sync_timeout)
            .await
        {
            info!("HADeployment cache synced with {} objects", self.lister.list().len());
        } else {
            warn!("HADeployment cache was not synced");
        }

        let worker = {
            let controller = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let period = self.config.period;
            tokio::spawn(async move {
                until(|| controller.worker(&shutdown), period, &shutdown).await;
            })
        };

        shutdown.cancelled().await;
        info!("Shutting down HADeployment work queue");
        self.queue.shut_down();

        worker
            .await
            .map_err(|e| ControllerError::Worker(format!("HADeployment worker panicked: {}", e)))?;

        info!("HADeployment Controller stopped");
        Ok(())
    }

    /// Drain the queue until `shutdown` fires, the queue shuts down or an
    /// item fails. Keys still pending at shutdown are not processed.
    async fn worker(&self, shutdown: &CancellationToken) {
        while !shutdown.is_cancelled() && self.process_next_item().await {}
    }

    /// Process one key from the queue.
    ///
    /// Returns `false` when the queue is shut down or the item failed, which
    /// ends the current drain; `true` after a successful create.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            debug!("HADeployment work queue shut down");
            return false;
        };

        let mut guard = QueueItemGuard {
            queue: &self.queue,
            key,
            requeue: false,
        };

        let result = self.sync_handler(&guard.key).await;
        match result {
            Ok(created) => created,
            Err(e) => {
                error!("Failed to process HADeployment {}: {}", guard.key, e);
                guard.requeue = self.config.requeue_on_error;
                false
            }
        }
    }

    /// Resolve the key through the lister and reconcile the cached object.
    async fn sync_handler(&self, key: &str) -> Result<bool, ControllerError> {
        let (namespace, name) = split_meta_namespace_key(key)?;
        let ha = self.lister.get(namespace, name)?;
        info!(spec = ?ha.spec, "Reconciling HADeployment {}", key);

        self.reconciler.reconcile(&ha).await
    }
}

/// Add handler: translate an added HADeployment into its key and enqueue it.
///
/// Objects whose key cannot be built are logged and dropped.
pub(crate) fn enqueue_added(queue: &RateLimitingQueue<String>, obj: &HADeployment) {
    match meta_namespace_key(obj) {
        Ok(key) => {
            debug!("HADeployment added: {}", key);
            queue.add(key);
        }
        Err(e) => error!("Failed to build key for added HADeployment: {}", e),
    }
}

/// Run `f` repeatedly, pausing `period` after each completion, until
/// `shutdown` fires.
pub async fn until<F, Fut>(mut f: F, period: Duration, shutdown: &CancellationToken)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    while !shutdown.is_cancelled() {
        f().await;
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }
    }
}
