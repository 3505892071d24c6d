//! Resource Manager
//!
//! Owns every collection, the page cache service and the resource-level
//! event bus. Ingests server payloads, resolves descriptions and records,
//! and answers filtered queries through the filter reducer.

use crate::collection::{Collection, CollectionIndex, CollectionStats, DirtyFlag};
use crate::config::CacheConfig;
use crate::events::{Event, EventBus};
use crate::model::{Filter, OuterPaging, Paging, Record, RecordKey, ResourceDescription, SortSpec, Value};
use crate::pager::{PageSource, PageStore, PagerContext, PagerKey, Sorted};
use crate::remote::{LinkChanges, QueryPage, Remote, ServerData};
use crate::resources::{FilterReducer, ResourceError, ResourceResult};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info, warn};

/// What one `apply` changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyStats {
    pub described: usize,
    pub deleted: usize,
    pub inserted: usize,
    pub updated: usize,
    pub received: usize,
    pub links: usize,
}

pub struct ResourceManager {
    remote: Arc<dyn Remote>,
    config: CacheConfig,
    descriptions: Mutex<HashMap<String, Arc<OnceCell<Arc<ResourceDescription>>>>>,
    /// Resources whose description failed; never retried
    failed: RwLock<HashSet<String>>,
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
    pages: PageStore,
    events: EventBus,
    pub(super) dirty: DirtyFlag,
    reducer: Mutex<FilterReducer>,
    pub(super) shutdown: RwLock<bool>,
}

impl ResourceManager {
    pub fn new(remote: Arc<dyn Remote>) -> Self {
        Self::with_config(remote, CacheConfig::default())
    }

    pub fn with_config(remote: Arc<dyn Remote>, config: CacheConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            remote,
            config,
            descriptions: Mutex::new(HashMap::new()),
            failed: RwLock::new(HashSet::new()),
            collections: RwLock::new(HashMap::new()),
            pages: PageStore::new(),
            events,
            dirty: DirtyFlag::new(),
            reducer: Mutex::new(FilterReducer::new()),
            shutdown: RwLock::new(false),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn pages(&self) -> &PageStore {
        &self.pages
    }

    pub fn dirty(&self) -> &DirtyFlag {
        &self.dirty
    }

    pub fn default_paging(&self) -> Paging {
        self.config.default_paging()
    }

    /// Description of `resource`, fetched once
    ///
    /// Concurrent callers share one remote request. A failure is remembered
    /// and every later call fails fast with `ModelNotFound`.
    pub async fn describe(&self, resource: &str) -> ResourceResult<Arc<ResourceDescription>> {
        if let Some(collection) = self.collections.read().await.get(resource) {
            return Ok(collection.read().await.description().clone());
        }
        if self.failed.read().await.contains(resource) {
            return Err(ResourceError::ModelNotFound(resource.to_string()));
        }

        let cell = self
            .descriptions
            .lock()
            .await
            .entry(resource.to_string())
            .or_default()
            .clone();
        let description = cell
            .get_or_try_init(move || async move {
                if self.failed.read().await.contains(resource) {
                    return Err(ResourceError::ModelNotFound(resource.to_string()));
                }
                debug!(resource = %resource, "Describing resource");
                match self.remote.describe(resource).await {
                    Ok(description) => Ok(Arc::new(description)),
                    Err(e) => {
                        error!(resource = %resource, error = %e, "Description failed");
                        self.failed.write().await.insert(resource.to_string());
                        Err(ResourceError::ModelNotFound(resource.to_string()))
                    }
                }
            })
            .await?
            .clone();

        self.register(description.clone()).await;
        Ok(description)
    }

    /// Collection of `resource`, describing it first if needed
    pub async fn collection(&self, resource: &str) -> ResourceResult<Arc<RwLock<Collection>>> {
        self.describe(resource).await?;
        self.existing(resource).await
    }

    /// Collection of an already described resource
    async fn existing(&self, resource: &str) -> ResourceResult<Arc<RwLock<Collection>>> {
        self.collections
            .read()
            .await
            .get(resource)
            .cloned()
            .ok_or_else(|| ResourceError::UnknownResource(resource.to_string()))
    }

    /// Create the collection for `description` unless it exists
    ///
    /// Returns true when the resource is new.
    async fn register(&self, description: Arc<ResourceDescription>) -> bool {
        let name = description.name.clone();
        {
            let mut collections = self.collections.write().await;
            if collections.contains_key(&name) {
                return false;
            }
            let collection = Collection::new(description.clone(), self.dirty.clone());
            collections.insert(name.clone(), Arc::new(RwLock::new(collection)));
        }
        let cell = self.descriptions.lock().await.entry(name.clone()).or_default().clone();
        // Already set when the description came through `describe`
        let _ = cell.set(description.clone());
        self.failed.write().await.remove(&name);

        info!(resource = %name, rpp = description.rpp, "Registered model");
        self.events.emit(Event::got_model((*description).clone()));
        true
    }

    /// Ingest a server payload
    ///
    /// Sections are applied in order: descriptions, deletes, new rows,
    /// updates, fetch results, links. Deletes are reconciled into every page
    /// cache before any insert is placed. Events go out after each section,
    /// with no lock held; `got-data` closes the batch.
    pub async fn apply(&self, data: ServerData) -> ApplyStats {
        let mut stats = ApplyStats::default();

        for description in data.description {
            if self.register(Arc::new(description)).await {
                stats.described += 1;
            }
        }

        for (resource, keys) in data.delete {
            let Some(collection) = self.section_target(&resource, "delete").await else {
                continue;
            };
            let removed: Vec<RecordKey> = {
                let mut collection = collection.write().await;
                let pk = collection.primary_key().to_vec();
                collection.delete(&keys).iter().map(|r| r.key(&pk)).collect()
            };
            for sorted in self.pages.caches_for(&resource).await {
                sorted.on_delete(&keys).await;
            }
            stats.deleted += removed.len();
            if !removed.is_empty() {
                self.events.emit(Event::deleted(&resource, removed));
            }
        }

        for (resource, rows) in data.new {
            let Some(collection) = self.section_target(&resource, "new").await else {
                continue;
            };
            let result = collection.write().await.bulk_insert(rows);
            for sorted in self.pages.caches_for(&resource).await {
                sorted.on_insert(&result.inserted).await;
                sorted.on_update(&result.updated).await;
            }
            stats.inserted += result.inserted.len();
            stats.updated += result.updated.len();
            self.announce(&resource, result.inserted, result.updated, &mut stats, true);
        }

        for (resource, rows) in data.update {
            let Some(collection) = self.section_target(&resource, "update").await else {
                continue;
            };
            let updated = collection.write().await.bulk_update(rows);
            for sorted in self.pages.caches_for(&resource).await {
                sorted.on_update(&updated).await;
            }
            stats.updated += updated.len();
            self.announce(&resource, Vec::new(), updated, &mut stats, false);
        }

        for (resource, rows) in data.results {
            let Some(collection) = self.section_target(&resource, "results").await else {
                continue;
            };
            let result = collection.write().await.bulk_insert(rows);
            for sorted in self.pages.caches_for(&resource).await {
                sorted.on_update(&result.updated).await;
            }
            stats.updated += result.updated.len();
            self.announce(&resource, result.inserted, result.updated, &mut stats, false);
        }

        for (resource, attributes) in data.m2m {
            let Some(collection) = self.section_target(&resource, "m2m").await else {
                continue;
            };
            let mut collection = collection.write().await;
            for (attribute, changes) in attributes {
                stats.links += apply_links(&mut collection, &attribute, &changes);
            }
        }

        self.events.emit(Event::got_data());
        stats
    }

    /// Decode and ingest a JSON payload
    pub async fn apply_json(&self, json: &str) -> ResourceResult<ApplyStats> {
        let data: ServerData = serde_json::from_str(json)?;
        Ok(self.apply(data).await)
    }

    async fn section_target(&self, resource: &str, section: &str) -> Option<Arc<RwLock<Collection>>> {
        match self.collection(resource).await {
            Ok(collection) => Some(collection),
            Err(e) => {
                warn!(resource = %resource, section, error = %e, "Skipping payload section");
                None
            }
        }
    }

    /// Emit `new-` (server inserts only), `updated-` and `received-`
    fn announce(
        &self,
        resource: &str,
        inserted: Vec<Record>,
        updated: Vec<Record>,
        stats: &mut ApplyStats,
        remote_insert: bool,
    ) {
        let mut received = Vec::with_capacity(inserted.len() + updated.len());
        received.extend(inserted.iter().cloned());
        received.extend(updated.iter().cloned());
        stats.received += received.len();

        if remote_insert && !inserted.is_empty() {
            self.events.emit(Event::inserted(resource, inserted));
        }
        if !updated.is_empty() {
            self.events.emit(Event::updated(resource, updated));
        }
        if !received.is_empty() {
            self.events.emit(Event::received(resource, received));
        }
    }

    /// Records for `keys`, in request order
    ///
    /// Keys not held locally are fetched with a primary-key filter first.
    /// Keys the server does not know yield no entry.
    pub async fn get(&self, resource: &str, keys: &[RecordKey]) -> ResourceResult<Vec<Record>> {
        let collection = self.collection(resource).await?;
        let (missing, pk) = {
            let collection = collection.read().await;
            let missing: Vec<RecordKey> = keys.iter().filter(|k| !collection.contains(k)).cloned().collect();
            (missing, collection.primary_key().to_vec())
        };

        if !missing.is_empty() {
            debug!(resource = %resource, missing = missing.len(), "Fetching records");
            let data = self.remote.fetch(resource, &Filter::by_keys(&pk, &missing)).await?;
            self.apply(data).await;
        }

        let collection = collection.read().await;
        Ok(keys.iter().filter_map(|k| collection.record(k)).cloned().collect())
    }

    /// Records matching `filter`
    ///
    /// Only the part of the filter never asked before is fetched; the
    /// answer always comes from the local collection.
    pub async fn query(&self, resource: &str, filter: &Filter) -> ResourceResult<Vec<Record>> {
        let collection = self.collection(resource).await?;
        let reduced = {
            let collection = collection.read().await;
            let held = |field: &str, value: &Value| held_locally(&collection, field, value);
            self.reducer.lock().await.reduce(resource, filter, held)
        };

        if let Some(reduced) = reduced {
            debug!(resource = %resource, filter = %reduced.cache_key(), "Fetching filter");
            match self.remote.fetch(resource, &reduced).await {
                Ok(data) => {
                    self.apply(data).await;
                }
                Err(e) => {
                    self.reducer.lock().await.forget(resource, &reduced);
                    return Err(e.into());
                }
            }
        }

        let found = collection.read().await.find(filter);
        Ok(found)
    }

    /// Shared page cache for (resource, filter, sort)
    pub async fn sorted(&self, resource: &str, filter: Filter, sort: SortSpec) -> ResourceResult<Arc<Sorted>> {
        let collection = self.collection(resource).await?;
        let description = collection.read().await.description().clone();
        let key = PagerKey::new(resource, &filter, &sort);
        let events = self.events.clone();
        Ok(self
            .pages
            .sorted(&key, move |gate| {
                Sorted::new(
                    description,
                    filter,
                    sort,
                    PagerContext {
                        collection,
                        events,
                        gate,
                    },
                )
            })
            .await)
    }

    /// Drop the page caches of `resource`
    pub async fn evict(&self, resource: &str) -> usize {
        self.pages.evict(resource).await
    }

    pub async fn add_index(&self, resource: &str, field: &str) -> ResourceResult<()> {
        self.existing(resource).await?.write().await.add_index(field);
        Ok(())
    }

    pub async fn add_multi_index(&self, resource: &str, field: &str) -> ResourceResult<()> {
        self.existing(resource).await?.write().await.add_multi_index(field);
        Ok(())
    }

    pub async fn add_many_to_many(&self, resource: &str, attribute: &str) -> ResourceResult<()> {
        self.existing(resource).await?.write().await.add_many_to_many(attribute);
        Ok(())
    }

    pub async fn delete_index(&self, resource: &str, field: &str) -> ResourceResult<bool> {
        Ok(self.existing(resource).await?.write().await.delete_index(field))
    }

    /// Entries in the index over `field`, if one exists
    pub async fn index_len(&self, resource: &str, field: &str) -> ResourceResult<Option<usize>> {
        let collection = self.existing(resource).await?;
        let collection = collection.read().await;
        Ok(collection.get_index(field).map(|i| i.len()))
    }

    pub async fn stats(&self) -> Vec<CollectionStats> {
        let collections: Vec<_> = self.collections.read().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(collections.len());
        for collection in collections {
            stats.push(collection.read().await.stats());
        }
        stats.sort_by(|a, b| a.resource.cmp(&b.resource));
        stats
    }

    pub(super) async fn collection_handles(&self) -> Vec<(String, Arc<RwLock<Collection>>)> {
        let mut out: Vec<_> = self
            .collections
            .read()
            .await
            .iter()
            .map(|(name, c)| (name.clone(), c.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub(super) fn remote(&self) -> &Arc<dyn Remote> {
        &self.remote
    }

    pub(super) async fn existing_collection(&self, resource: &str) -> ResourceResult<Arc<RwLock<Collection>>> {
        self.existing(resource).await
    }
}

/// A value already answered locally through the primary key or a
/// single-value index
fn held_locally(collection: &Collection, field: &str, value: &Value) -> bool {
    let pk = collection.primary_key();
    if pk.len() == 1 && pk[0] == field {
        return collection.contains(&RecordKey::from(value.clone()));
    }
    match collection.get_index(field) {
        Some(CollectionIndex::Single(index)) => index.contains(&RecordKey::from(value.clone())),
        _ => false,
    }
}

fn apply_links(collection: &mut Collection, attribute: &str, changes: &LinkChanges) -> usize {
    let mut count = 0;
    for (local, remotes) in LinkChanges::grouped(&changes.add) {
        count += remotes.len();
        collection.link(attribute, local, remotes);
    }
    for (local, remotes) in LinkChanges::grouped(&changes.del) {
        count += remotes.len();
        collection.unlink(attribute, &local, remotes);
    }
    count
}

#[async_trait]
impl PageSource for ResourceManager {
    async fn query_page(
        &self,
        resource: &str,
        filter: &Filter,
        paging: &OuterPaging,
    ) -> ResourceResult<QueryPage> {
        let page = self.remote.query(resource, filter, paging).await?;
        debug!(
            resource = %resource,
            page = paging.page_number,
            keys = page.pks.len(),
            total = page.total_count,
            "Remote page"
        );
        Ok(page)
    }

    async fn resolve(&self, resource: &str, keys: &[RecordKey]) -> ResourceResult<Vec<Record>> {
        self.get(resource, keys).await
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("config", &self.config)
            .field("dirty", &self.dirty)
            .finish()
    }
}
