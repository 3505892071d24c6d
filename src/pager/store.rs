//! Process-wide page cache service
//!
//! Owns every `Sorted` cache, keyed by (resource, filter, sort), plus the
//! per-resource query gates. Windows get shared handles from here; explicit
//! eviction tears a resource's caches down.

use crate::pager::{PagerKey, Sorted};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct PageStore {
    caches: Mutex<HashMap<PagerKey, Arc<Sorted>>>,
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared cache for `key`, built with `create` on first use
    ///
    /// `create` receives the resource's query gate.
    pub async fn sorted<F>(&self, key: &PagerKey, create: F) -> Arc<Sorted>
    where
        F: FnOnce(Arc<Mutex<()>>) -> Sorted,
    {
        let gate = self.gate(&key.resource).await;
        let mut caches = self.caches.lock().await;
        caches
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(key = %key, "Creating sorted cache");
                Arc::new(create(gate))
            })
            .clone()
    }

    pub async fn get(&self, key: &PagerKey) -> Option<Arc<Sorted>> {
        self.caches.lock().await.get(key).cloned()
    }

    /// Query gate of `resource`
    pub async fn gate(&self, resource: &str) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .await
            .entry(resource.to_string())
            .or_default()
            .clone()
    }

    /// All caches of `resource`, in key order
    pub async fn caches_for(&self, resource: &str) -> Vec<Arc<Sorted>> {
        let caches = self.caches.lock().await;
        let mut keys: Vec<&PagerKey> = caches.keys().filter(|k| k.resource == resource).collect();
        keys.sort();
        keys.into_iter().filter_map(|k| caches.get(k).cloned()).collect()
    }

    /// Drop every cache of `resource`; returns how many were dropped
    pub async fn evict(&self, resource: &str) -> usize {
        let mut caches = self.caches.lock().await;
        let before = caches.len();
        caches.retain(|k, _| k.resource != resource);
        let evicted = before - caches.len();
        tracing::info!(resource = %resource, evicted, "Evicted page caches");
        evicted
    }

    pub async fn clear(&self) {
        self.caches.lock().await.clear();
        tracing::info!("Cleared page store");
    }

    pub async fn len(&self) -> usize {
        self.caches.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{Collection, DirtyFlag};
    use crate::events::EventBus;
    use crate::model::{Filter, ResourceDescription, SortSpec};
    use crate::pager::PagerContext;
    use tokio::sync::RwLock;

    struct Fixture {
        store: PageStore,
        collections: HashMap<String, Arc<RwLock<Collection>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let collections = ["item", "tag"]
                .into_iter()
                .map(|name| {
                    let description = Arc::new(ResourceDescription::new(name, 10, &["id"]));
                    let collection = Collection::new(description, DirtyFlag::new());
                    (name.to_string(), Arc::new(RwLock::new(collection)))
                })
                .collect();
            Self {
                store: PageStore::new(),
                collections,
            }
        }

        async fn open(&self, resource: &str, group: i64) -> Arc<Sorted> {
            let filter = Filter::new().equals("group", group);
            let sort = SortSpec::default();
            let key = PagerKey::new(resource, &filter, &sort);
            let collection = self.collections[resource].clone();
            let description = collection.read().await.description().clone();
            self.store
                .sorted(&key, |gate| {
                    Sorted::new(
                        description,
                        filter,
                        sort,
                        PagerContext {
                            collection,
                            events: EventBus::default(),
                            gate,
                        },
                    )
                })
                .await
        }
    }

    #[tokio::test]
    async fn test_same_key_shares_cache() {
        let fx = Fixture::new();
        let a = fx.open("item", 1).await;
        let b = fx.open("item", 1).await;
        let c = fx.open("item", 2).await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(fx.store.len().await, 2);
        assert!(fx.store.get(a.key()).await.is_some());
    }

    #[tokio::test]
    async fn test_gate_per_resource() {
        let store = PageStore::new();
        let a = store.gate("item").await;
        let b = store.gate("item").await;
        let c = store.gate("tag").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_evict_and_clear() {
        let fx = Fixture::new();
        fx.open("item", 1).await;
        fx.open("item", 2).await;
        fx.open("tag", 1).await;

        assert_eq!(fx.store.caches_for("item").await.len(), 2);
        assert_eq!(fx.store.evict("item").await, 2);
        assert_eq!(fx.store.len().await, 1);
        assert!(fx.store.caches_for("item").await.is_empty());

        fx.store.clear().await;
        assert!(fx.store.is_empty().await);
    }
}
