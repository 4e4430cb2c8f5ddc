//! Watch/cache layer.
//!
//! The informer consumes a `kube_runtime::watcher` stream, mirrors the
//! watched objects into a reflector store and delivers typed add, update and
//! delete notifications to registered handlers.
//!
//! Handlers run synchronously on the informer task, in stream order, after the
//! cache reflects the event. They must not block or perform I/O.
//!
//! Initial lists and re-lists (`Init`, `InitApply`, `InitDone`) are buffered
//! by the store until `InitDone`; notifications for them are derived by
//! comparing the cache before and after the swap.

use crate::error::ControllerError;
use crate::lister::Lister;
use futures::{FutureExt, Stream, StreamExt};
use kube::Resource;
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::watcher;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A change observed on the watch stream.
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    /// The object was not cached before
    Added(Arc<K>),
    /// The object was cached and has been replaced (or redelivered on resync)
    Updated {
        /// Cached object before the event
        old: Arc<K>,
        /// Cached object after the event
        new: Arc<K>,
    },
    /// The object was removed from the cache
    Deleted(Arc<K>),
}

/// Receives informer notifications.
pub trait ResourceEventHandler<K>: Send + Sync {
    /// Called once per event, in stream order.
    fn on_event(&self, event: &ResourceEvent<K>);
}

type AddFn<K> = Box<dyn Fn(&Arc<K>) + Send + Sync>;
type UpdateFn<K> = Box<dyn Fn(&Arc<K>, &Arc<K>) + Send + Sync>;
type DeleteFn<K> = Box<dyn Fn(&Arc<K>) + Send + Sync>;

/// Handler built from optional closures; missing closures ignore the event.
pub struct ResourceEventHandlerFuncs<K> {
    add: Option<AddFn<K>>,
    update: Option<UpdateFn<K>>,
    delete: Option<DeleteFn<K>>,
}

impl<K> Default for ResourceEventHandlerFuncs<K> {
    fn default() -> Self {
        Self {
            add: None,
            update: None,
            delete: None,
        }
    }
}

impl<K> fmt::Debug for ResourceEventHandlerFuncs<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceEventHandlerFuncs")
            .field("add", &self.add.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

impl<K> ResourceEventHandlerFuncs<K> {
    /// Handle `Added` events.
    #[must_use]
    pub fn on_add(mut self, f: impl Fn(&Arc<K>) + Send + Sync + 'static) -> Self {
        self.add = Some(Box::new(f));
        self
    }

    /// Handle `Updated` events as `(old, new)`.
    #[must_use]
    #[allow(dead_code)] // The controller only registers an add handler
    pub fn on_update(mut self, f: impl Fn(&Arc<K>, &Arc<K>) + Send + Sync + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    /// Handle `Deleted` events.
    #[must_use]
    #[allow(dead_code)] // The controller only registers an add handler
    pub fn on_delete(mut self, f: impl Fn(&Arc<K>) + Send + Sync + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

impl<K> ResourceEventHandler<K> for ResourceEventHandlerFuncs<K>
where
    K: Send + Sync,
{
    fn on_event(&self, event: &ResourceEvent<K>) {
        match event {
            ResourceEvent::Added(obj) => {
                if let Some(f) = &self.add {
                    f(obj);
                }
            }
            ResourceEvent::Updated { old, new } => {
                if let Some(f) = &self.update {
                    f(old, new);
                }
            }
            ResourceEvent::Deleted(obj) => {
                if let Some(f) = &self.delete {
                    f(obj);
                }
            }
        }
    }
}

/// Reports whether the informer cache has completed its initial list.
#[derive(Clone)]
pub struct CacheSynced<K>
where
    K: Resource + 'static,
    K::DynamicType: Hash + Eq,
{
    store: Store<K>,
}

impl<K> fmt::Debug for CacheSynced<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSynced")
            .field("synced", &self.has_synced())
            .finish()
    }
}

impl<K> CacheSynced<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    /// Whether the initial list has been applied to the cache.
    pub fn has_synced(&self) -> bool {
        matches!(self.store.wait_until_ready().now_or_never(), Some(Ok(())))
    }

    /// Wait for the initial list.
    ///
    /// Returns `false` if `shutdown` fires, `timeout` elapses or the informer
    /// goes away first.
    pub async fn wait_for_cache_sync(&self, shutdown: &CancellationToken, timeout: Option<Duration>) -> bool {
        let ready = async {
            match timeout {
                Some(timeout) => matches!(
                    tokio::time::timeout(timeout, self.store.wait_until_ready()).await,
                    Ok(Ok(()))
                ),
                None => self.store.wait_until_ready().await.is_ok(),
            }
        };

        tokio::select! {
            synced = ready => synced,
            () = shutdown.cancelled() => false,
        }
    }
}

/// Watch/cache for objects of kind `K`.
pub struct Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    writer: Writer<K>,
    store: Store<K>,
    handlers: Vec<Box<dyn ResourceEventHandler<K>>>,
    /// Objects delivered by the current (re-)list, released at `InitDone`
    relist: Vec<ObjectRef<K>>,
    resync_period: Option<Duration>,
}

impl<K> fmt::Debug for Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Informer")
            .field("handlers", &self.handlers.len())
            .field("resync_period", &self.resync_period)
            .finish_non_exhaustive()
    }
}

impl<K> Informer<K>
where
    K: Resource + Clone + Send + Sync + fmt::Debug + 'static,
    K::DynamicType: Hash + Eq + Clone + Default + Send + Sync,
{
    /// Create an informer with an empty cache.
    ///
    /// When `resync_period` is set, every cached object is redelivered to the
    /// handlers as an update at that interval.
    pub fn new(resync_period: Option<Duration>) -> Self {
        let writer = Writer::default();
        let store = writer.as_reader();
        Self {
            writer,
            store,
            handlers: Vec::new(),
            relist: Vec::new(),
            resync_period,
        }
    }

    /// Register a handler. Registrations are additive and never removed.
    pub fn add_event_handler(&mut self, handler: impl ResourceEventHandler<K> + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Indexed read-only view over the cache.
    pub fn lister(&self) -> Lister<K> {
        Lister::new(self.store.clone())
    }

    /// Sync signal for the cache.
    pub fn synced(&self) -> CacheSynced<K> {
        CacheSynced {
            store: self.store.clone(),
        }
    }

    /// Drive the informer until `shutdown` fires or the stream ends.
    ///
    /// Stream errors are logged; the watcher reconnects on its own when it
    /// was built with a backoff.
    pub async fn run<S>(mut self, stream: S, shutdown: CancellationToken) -> Result<(), ControllerError>
    where
        S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
    {
        info!("Starting {} informer", K::kind(&K::DynamicType::default()));

        let mut stream = pin!(stream);
        let mut resync = self.resync_period.map(|period| {
            tokio::time::interval_at(Instant::now() + period, period)
        });

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("Informer shutting down");
                    return Ok(());
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => warn!("Watcher stream error: {}", e),
                    None => {
                        warn!("Watcher stream ended");
                        return Err(ControllerError::Watch("watch stream ended".to_string()));
                    }
                },
                () = next_resync(&mut resync) => self.resync(),
            }
        }
    }

    /// Apply one watcher event to the cache and notify handlers.
    ///
    /// Objects without a name cannot be keyed and are skipped.
    pub fn handle_event(&mut self, event: watcher::Event<K>) {
        if let watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) | watcher::Event::Delete(obj) = &event {
            if obj.meta().name.is_none() {
                warn!("Ignoring {} without a name", K::kind(&K::DynamicType::default()));
                return;
            }
        }

        match event {
            watcher::Event::Apply(obj) => {
                let obj_ref = ObjectRef::from_obj(&obj);
                let old = self.store.get(&obj_ref);
                self.writer.apply_watcher_event(&watcher::Event::Apply(obj));

                let Some(new) = self.store.get(&obj_ref) else {
                    return;
                };
                match old {
                    Some(old) => self.notify(&ResourceEvent::Updated { old, new }),
                    None => self.notify(&ResourceEvent::Added(new)),
                }
            }
            watcher::Event::Delete(obj) => {
                let obj_ref = ObjectRef::from_obj(&obj);
                let old = self.store.get(&obj_ref);
                self.writer.apply_watcher_event(&watcher::Event::Delete(obj.clone()));

                self.notify(&ResourceEvent::Deleted(old.unwrap_or_else(|| Arc::new(obj))));
            }
            watcher::Event::Init => {
                debug!("Informer list started");
                self.relist.clear();
                self.writer.apply_watcher_event(&watcher::Event::Init);
            }
            watcher::Event::InitApply(obj) => {
                self.relist.push(ObjectRef::from_obj(&obj));
                self.writer.apply_watcher_event(&watcher::Event::InitApply(obj));
            }
            watcher::Event::InitDone => {
                let before: HashMap<ObjectRef<K>, Arc<K>> = self
                    .store
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(&*obj), obj))
                    .collect();
                self.writer.apply_watcher_event(&watcher::Event::InitDone);

                let relist = std::mem::take(&mut self.relist);
                let listed: HashSet<&ObjectRef<K>> = relist.iter().collect();
                let mut events = Vec::with_capacity(relist.len());
                for obj_ref in &relist {
                    let Some(new) = self.store.get(obj_ref) else {
                        continue;
                    };
                    match before.get(obj_ref) {
                        Some(old) => events.push(ResourceEvent::Updated {
                            old: Arc::clone(old),
                            new,
                        }),
                        None => events.push(ResourceEvent::Added(new)),
                    }
                }
                for (obj_ref, old) in &before {
                    if !listed.contains(obj_ref) {
                        events.push(ResourceEvent::Deleted(Arc::clone(old)));
                    }
                }

                info!("Informer cache synced with {} objects", relist.len());
                for event in &events {
                    self.notify(event);
                }
            }
        }
    }

    /// Redeliver every cached object as an update.
    fn resync(&self) {
        let objects = self.store.state();
        debug!("Resyncing {} cached objects", objects.len());
        for obj in objects {
            self.notify(&ResourceEvent::Updated {
                old: Arc::clone(&obj),
                new: obj,
            });
        }
    }

    fn notify(&self, event: &ResourceEvent<K>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Resolves on the next resync tick; never resolves when resync is disabled.
async fn next_resync(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
