//! Read-only, namespace+name indexed view over the informer cache.
//!
//! Lookups never touch the API server. The view is eventually consistent:
//! it may lag behind the cluster, and an object may disappear between the
//! moment its key was queued and the moment it is looked up.

use kube::Resource;
use kube_runtime::reflector::{ObjectRef, Store};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

/// Lookup failures. Not finding an object is an expected outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListerError {
    /// The key is absent from the cache
    #[error("{namespace}/{name} not found in cache")]
    NotFound {
        /// Namespace that was looked up
        namespace: String,
        /// Name that was looked up
        name: String,
    },
}

/// Indexed snapshot of cached objects of kind `K`.
#[derive(Clone)]
pub struct Lister<K>
where
    K: Resource + 'static,
    K::DynamicType: Hash + Eq,
{
    store: Store<K>,
}

impl<K> fmt::Debug for Lister<K>
where
    K: Resource + 'static,
    K::DynamicType: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lister").finish_non_exhaustive()
    }
}

impl<K> Lister<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Hash + Eq + Clone + Default,
{
    /// Wrap a reflector store.
    pub fn new(store: Store<K>) -> Self {
        Self { store }
    }

    /// Get an object by namespace and name.
    pub fn get(&self, namespace: &str, name: &str) -> Result<Arc<K>, ListerError> {
        let mut obj_ref = ObjectRef::<K>::new(name);
        if !namespace.is_empty() {
            obj_ref = obj_ref.within(namespace);
        }

        self.store.get(&obj_ref).ok_or_else(|| ListerError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Every cached object.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Every cached object in `namespace`.
    #[allow(dead_code)] // Namespace-scoped listing for callers watching all namespaces
    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<K>> {
        self.store
            .state()
            .into_iter()
            .filter(|obj| obj.meta().namespace.as_deref() == Some(namespace))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cached_store, create_test_ha_deployment};

    #[test]
    fn test_get_cached_object() {
        let store = cached_store(vec![create_test_ha_deployment("web", "default", 3, "nginx:1.21")]);
        let lister = Lister::new(store);

        let ha = lister.get("default", "web").unwrap();
        assert_eq!(ha.spec.replicas, 3);
        assert_eq!(ha.spec.image, "nginx:1.21");
    }

    #[test]
    fn test_get_missing_object_is_not_found() {
        let store = cached_store(vec![create_test_ha_deployment("web", "default", 3, "nginx:1.21")]);
        let lister = Lister::new(store);

        assert_eq!(
            lister.get("other", "web").unwrap_err(),
            ListerError::NotFound {
                namespace: "other".to_string(),
                name: "web".to_string(),
            }
        );
        assert!(lister.get("default", "api").is_err());
    }

    #[test]
    fn test_list_namespace() {
        let store = cached_store(vec![
            create_test_ha_deployment("web", "default", 1, "nginx"),
            create_test_ha_deployment("api", "default", 1, "nginx"),
            create_test_ha_deployment("web", "team-a", 1, "nginx"),
        ]);
        let lister = Lister::new(store);

        assert_eq!(lister.list().len(), 3);
        assert_eq!(lister.list_namespace("default").len(), 2);
        assert_eq!(lister.list_namespace("team-a").len(), 1);
        assert!(lister.list_namespace("missing").is_empty());
    }
}
