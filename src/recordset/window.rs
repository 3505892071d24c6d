//! RecordSet window
//!
//! Holds the paging state of one view, loads the current page through the
//! shared sorted caches and publishes it. Listens to the resource's delete
//! and insert notifications for as long as it lives.
//!
//! Loads are numbered; a load that finishes after a newer one was issued is
//! dropped instead of published.

use crate::events::{deleted_topic, new_topic, Event, EventBus, EventStream, Payload};
use crate::model::{Filter, Paging, Record, RecordKey, SortSpec};
use crate::pager::{PageSlice, PagerKey, Sorted};
use crate::recordset::{PageCallback, PageResult, WindowOptions};
use crate::resources::{ResourceManager, ResourceResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

struct WindowState {
    filter: Filter,
    paging: Paging,
    /// Every cache this window has loaded from
    caches: HashMap<PagerKey, Arc<Sorted>>,
    records: Vec<Record>,
    total_count: usize,
    loading: bool,
}

pub struct RecordSet {
    name: String,
    resource: String,
    manager: Arc<ResourceManager>,
    events: EventBus,
    state: Mutex<WindowState>,
    generation: AtomicU64,
    callback: Option<PageCallback>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RecordSet {
    /// Open a window on `resource`
    ///
    /// Nothing is loaded yet; the description is resolved by the first
    /// `load`.
    pub async fn open(manager: Arc<ResourceManager>, resource: &str, options: WindowOptions) -> Arc<Self> {
        let name = options
            .name
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let paging = options.paging.unwrap_or_else(|| manager.default_paging());
        let stream = manager
            .events()
            .subscribe([deleted_topic(resource), new_topic(resource)]);

        let set = Arc::new(Self {
            name,
            resource: resource.to_string(),
            events: EventBus::default(),
            state: Mutex::new(WindowState {
                filter: options.filter,
                paging,
                caches: HashMap::new(),
                records: Vec::new(),
                total_count: 0,
                loading: false,
            }),
            generation: AtomicU64::new(0),
            callback: options.callback,
            listener: Mutex::new(None),
            manager,
        });

        let handle = tokio::spawn(listen(Arc::downgrade(&set), stream));
        *set.listener.lock().await = Some(handle);
        info!(window = %set.name, resource = %set.resource, "Opened record set");
        set
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Window-level events: `loading`, `paging`, `records`, `error`, `refresh`
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe<I, S>(&self, topics: I) -> EventStream
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events.subscribe(topics)
    }

    pub async fn records(&self) -> Vec<Record> {
        self.state.lock().await.records.clone()
    }

    pub async fn total_count(&self) -> usize {
        self.state.lock().await.total_count
    }

    pub async fn paging(&self) -> Paging {
        self.state.lock().await.paging.clone()
    }

    pub async fn filter(&self) -> Filter {
        self.state.lock().await.filter.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.lock().await.loading
    }

    pub async fn set_rpp(&self, rpp: usize) -> Option<PageResult> {
        let rpp = rpp.max(1);
        {
            let mut state = self.state.lock().await;
            if state.paging.rpp == rpp {
                return None;
            }
            state.paging.rpp = rpp;
            state.paging.page = 1;
        }
        self.load().await
    }

    pub async fn set_page(&self, page: usize) -> Option<PageResult> {
        let page = page.max(1);
        {
            let mut state = self.state.lock().await;
            if state.paging.page == page {
                return None;
            }
            state.paging.page = page;
        }
        self.load().await
    }

    pub async fn set_sort(&self, sort: SortSpec) -> Option<PageResult> {
        {
            let mut state = self.state.lock().await;
            if state.paging.sort == sort {
                return None;
            }
            state.paging.sort = sort;
            state.paging.page = 1;
        }
        self.load().await
    }

    pub async fn set_filter(&self, filter: Filter) -> Option<PageResult> {
        {
            let mut state = self.state.lock().await;
            if state.filter == filter {
                return None;
            }
            state.filter = filter;
            state.paging.page = 1;
        }
        self.load().await
    }

    /// Load and publish the current page
    ///
    /// Errors become `error` events. Returns the published page, or `None`
    /// when the load failed or was superseded.
    pub async fn load(&self) -> Option<PageResult> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (filter, paging) = {
            let mut state = self.state.lock().await;
            state.loading = true;
            (state.filter.clone(), state.paging.clone())
        };
        self.events.emit(Event::loading(true));

        let fetched = self.fetch(filter, &paging).await;
        let current = self.generation.load(Ordering::SeqCst) == generation;

        let published = match fetched {
            Ok(slice) if current => Some(self.publish(slice, paging).await),
            Ok(_) => {
                debug!(window = %self.name, page = paging.page, "Dropping superseded page");
                None
            }
            Err(e) => {
                error!(window = %self.name, resource = %self.resource, error = %e, "Load failed");
                self.events.emit(Event::error(e.to_string()));
                None
            }
        };

        if current {
            self.state.lock().await.loading = false;
            self.events.emit(Event::loading(false));
        }
        published
    }

    async fn fetch(&self, filter: Filter, paging: &Paging) -> ResourceResult<PageSlice> {
        let sorted = self
            .manager
            .sorted(&self.resource, filter, paging.sort.clone())
            .await?;
        self.state
            .lock()
            .await
            .caches
            .entry(sorted.key().clone())
            .or_insert_with(|| sorted.clone());
        sorted.set_page(&*self.manager, paging).await
    }

    async fn publish(&self, slice: PageSlice, paging: Paging) -> PageResult {
        {
            let mut state = self.state.lock().await;
            state.records = slice.records.clone();
            state.total_count = slice.total_count;
        }

        let result = PageResult {
            window: self.name.clone(),
            resource: self.resource.clone(),
            records: slice.records,
            total_count: slice.total_count,
            paging,
            loaded_at: Utc::now(),
        };
        debug!(
            window = %self.name,
            page = result.paging.page,
            records = result.records.len(),
            total = result.total_count,
            "Publishing page"
        );

        self.events.emit(Event::records(result.records.clone()));
        self.events
            .emit(Event::paging(result.paging.clone(), result.total_count));
        self.manager.events().emit(Event::page(result.clone()));
        if let Some(callback) = &self.callback {
            callback(&result);
        }
        result
    }

    async fn caches(&self) -> Vec<Arc<Sorted>> {
        self.state.lock().await.caches.values().cloned().collect()
    }

    /// Strip deleted keys from every cache of this window, then reload
    pub async fn on_delete(&self, keys: &[RecordKey]) {
        for sorted in self.caches().await {
            sorted.on_delete(keys).await;
        }
        self.load().await;
        self.events.emit(Event::refresh());
    }

    /// Register inserted records with every cache of this window, then reload
    pub async fn on_insert(&self, records: &[Record]) {
        for sorted in self.caches().await {
            sorted.on_insert(records).await;
        }
        self.load().await;
    }

    /// Stop listening to resource notifications and drop cache references
    pub async fn destroy(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        self.state.lock().await.caches.clear();
        info!(window = %self.name, "Destroyed record set");
    }
}

impl Drop for RecordSet {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for RecordSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSet")
            .field("name", &self.name)
            .field("resource", &self.resource)
            .finish()
    }
}

/// Forward delete and insert notifications until the window is gone
async fn listen(window: Weak<RecordSet>, mut stream: EventStream) {
    while let Some(event) = stream.recv().await {
        let Some(set) = window.upgrade() else {
            break;
        };
        match event.payload {
            Payload::Deleted { keys, .. } => set.on_delete(&keys).await,
            Payload::New { records, .. } => set.on_insert(&records).await,
            _ => {}
        }
    }
}
