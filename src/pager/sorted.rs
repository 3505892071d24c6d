//! Sorted page cache for one (resource, filter, sort)
//!
//! `set_page` maps a window page onto outer pages, queries the outer pages it
//! is missing (one query in flight per resource), slices the keys out and
//! resolves them to records. `on_insert` / `on_delete` reconcile the cached
//! pages with server-side changes without re-querying.

use crate::events::Event;
use crate::model::{Comparator, Filter, OuterPaging, Paging, Record, RecordKey, ResourceDescription, SortSpec};
use crate::pager::{PageMap, PageSource, PagerContext, PagerKey};
use crate::resources::ResourceResult;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Records of one window page
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageSlice {
    pub records: Vec<Record>,
    pub total_count: usize,
}

pub struct Sorted {
    description: Arc<ResourceDescription>,
    filter: Filter,
    sort: SortSpec,
    comparator: Comparator,
    key: PagerKey,
    map: Mutex<PageMap>,
    ctx: PagerContext,
}

impl Sorted {
    pub fn new(
        description: Arc<ResourceDescription>,
        filter: Filter,
        sort: SortSpec,
        ctx: PagerContext,
    ) -> Self {
        let comparator = sort.comparator(&description.primary_key);
        let key = PagerKey::new(&description.name, &filter, &sort);
        let map = Mutex::new(PageMap::new(description.rpp));
        Self {
            description,
            filter,
            sort,
            comparator,
            key,
            map,
            ctx,
        }
    }

    pub fn key(&self) -> &PagerKey {
        &self.key
    }

    pub fn resource(&self) -> &str {
        &self.description.name
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub async fn total_count(&self) -> Option<usize> {
        self.map.lock().await.total_count()
    }

    pub async fn is_complete(&self) -> bool {
        self.map.lock().await.is_complete()
    }

    /// Copy of the page map
    pub async fn snapshot(&self) -> PageMap {
        self.map.lock().await.clone()
    }

    /// Records of window page `paging.page`
    ///
    /// A page starting past the known total is empty and costs no query.
    pub async fn set_page(&self, source: &dyn PageSource, paging: &Paging) -> ResourceResult<PageSlice> {
        self.reconcile().await;

        let rpp = self.description.rpp.max(1);
        let (from, to) = {
            let map = self.map.lock().await;
            let (from, to) = paging.range();
            let shift = map.pending_before(from);
            let (from, to) = (from.saturating_sub(shift), to.saturating_sub(shift));
            if let Some(total) = map.total_count() {
                if from >= total {
                    debug!(resource = %self.resource(), from, total, "Page past the end");
                    return Ok(PageSlice {
                        records: Vec::new(),
                        total_count: total,
                    });
                }
            }
            (from, to)
        };

        let first = from / rpp;
        self.ensure_page(source, first, false).await?;

        let total = self.map.lock().await.total_count().unwrap_or(0);
        let end = to.min(total);
        if from < end {
            let last = (end - 1) / rpp;
            for page in first + 1..=last {
                self.ensure_page(source, page, false).await?;
            }
        }

        self.reconcile().await;
        let (keys, total) = {
            let map = self.map.lock().await;
            let known = map.known_rows().unwrap_or(0);
            (map.slice(from, to.min(known)), map.total_count().unwrap_or(0))
        };

        let records = source.resolve(self.resource(), &keys).await?;
        if records.len() != keys.len() {
            debug!(
                resource = %self.resource(),
                requested = keys.len(),
                resolved = records.len(),
                "Some keys did not resolve"
            );
        }
        self.check_complete().await;

        Ok(PageSlice {
            records,
            total_count: total,
        })
    }

    /// Query outer page `page` unless it is cached and complete
    ///
    /// Returns whether a query was issued. Callers waiting on the gate
    /// re-check, so concurrent requests for one page cost one query.
    pub async fn ensure_page(&self, source: &dyn PageSource, page: usize, force: bool) -> ResourceResult<bool> {
        if !force && !self.map.lock().await.needs(page) {
            debug!(resource = %self.resource(), page, "Outer page cache hit");
            return Ok(false);
        }

        let gate = self.ctx.gate.lock().await;
        if !force && !self.map.lock().await.needs(page) {
            debug!(resource = %self.resource(), page, "Outer page loaded while waiting");
            return Ok(false);
        }

        let paging = OuterPaging::for_outer(page, self.description.rpp.max(1), self.sort.clone());
        debug!(resource = %self.resource(), page, filter = %self.key.filter, "Querying outer page");
        let result = source.query_page(self.resource(), &self.filter, &paging).await?;

        let outcome = self.map.lock().await.store_page(page, result);
        if let Some((expected, found)) = outcome.inconsistency {
            warn!(
                resource = %self.resource(),
                page,
                expected = ?expected,
                found = ?found,
                "Outer pages disagree at their boundary"
            );
            self.ctx
                .events
                .emit(Event::inconsistency(self.resource(), page, expected, found));
        }
        if outcome.deduplicated > 0 {
            debug!(resource = %self.resource(), page, dropped = outcome.deduplicated, "Deduplicated keys");
        }
        drop(gate);

        self.reconcile().await;
        Ok(true)
    }

    /// Register server-side inserts; returns how many became pending
    pub async fn on_insert(&self, records: &[Record]) -> usize {
        let pk = &self.description.primary_key;
        let mut added = 0;
        {
            let mut map = self.map.lock().await;
            for record in records.iter().filter(|r| self.filter.matches(r)) {
                if map.add_pending(record.key(pk)) {
                    added += 1;
                }
            }
        }
        if added > 0 {
            let placed = self.reconcile().await;
            debug!(resource = %self.resource(), added, placed, "Reconciled inserts");
        }
        added
    }

    /// Strip server-side deletes; returns how many keys were present
    pub async fn on_delete(&self, keys: &[RecordKey]) -> usize {
        let keys: HashSet<RecordKey> = keys.iter().cloned().collect();
        let removed = self.map.lock().await.remove_keys(&keys);
        if removed > 0 {
            debug!(resource = %self.resource(), removed, "Reconciled deletes");
            self.reconcile().await;
        }
        removed
    }

    /// Re-place records whose values changed
    ///
    /// A cached record may have moved in sort order or left the filter; it
    /// is removed and, if it still matches, registered again. An uncached
    /// record that matches may have entered the filter or moved into the
    /// cached range: a completely loaded cache registers it as an insert,
    /// any other cache is marked for re-query. Returns how many records were
    /// moved or registered.
    pub async fn on_update(&self, records: &[Record]) -> usize {
        let pk = &self.description.primary_key;
        let mut moved = 0;
        {
            let mut map = self.map.lock().await;
            for record in records {
                let key = record.key(pk);
                let held = map.contains_key(&key) || map.pending().iter().any(|p| p.key == key);
                if !held {
                    if !self.filter.matches(record) {
                        continue;
                    }
                    if map.is_complete() {
                        if map.add_pending(key) {
                            moved += 1;
                        }
                    } else if map.total_count().is_some() {
                        debug!(resource = %self.resource(), key = %key, "Uncached match, revalidating");
                        map.invalidate();
                    }
                    continue;
                }
                map.remove_keys(&HashSet::from([key.clone()]));
                if self.filter.matches(record) {
                    map.add_pending(key);
                }
                moved += 1;
            }
        }
        if moved > 0 {
            debug!(resource = %self.resource(), moved, "Reconciled updates");
            self.reconcile().await;
        }
        moved
    }

    /// Re-query every cached outer page unless completely loaded
    ///
    /// Returns false when the refresh was skipped.
    pub async fn refresh(&self, source: &dyn PageSource) -> ResourceResult<bool> {
        let pages = {
            let map = self.map.lock().await;
            if map.is_complete() {
                debug!(resource = %self.resource(), "Refresh skipped, completely loaded");
                return Ok(false);
            }
            map.cached_pages()
        };
        for page in pages {
            self.ensure_page(source, page, true).await?;
        }
        self.check_complete().await;
        Ok(true)
    }

    /// Place pending insertions whose neighbors are known
    async fn reconcile(&self) -> usize {
        let guard = self.ctx.collection.read().await;
        let collection = &*guard;
        let mut map = self.map.lock().await;
        if map.pending().is_empty() {
            return 0;
        }
        map.place_pendings(&|k: &RecordKey| collection.record(k), &self.comparator)
    }

    async fn check_complete(&self) -> bool {
        let guard = self.ctx.collection.read().await;
        let collection = &*guard;
        let mut map = self.map.lock().await;
        let complete = map.check_complete(|k| collection.contains(k));
        if complete {
            debug!(resource = %self.resource(), key = %self.key, "Completely loaded");
        }
        complete
    }
}

impl std::fmt::Debug for Sorted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sorted").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{Collection, DirtyFlag};
    use crate::events::EventBus;
    use crate::model::{row, Row, Value};
    use crate::remote::{MemoryRemote, QueryPage, Remote, RemoteError};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::RwLock;

    /// Queries go to the remote, records come from the collection
    struct Source {
        remote: MemoryRemote,
        collection: Arc<RwLock<Collection>>,
    }

    #[async_trait]
    impl PageSource for Source {
        async fn query_page(
            &self,
            resource: &str,
            filter: &Filter,
            paging: &OuterPaging,
        ) -> ResourceResult<QueryPage> {
            Ok(self.remote.query(resource, filter, paging).await?)
        }

        async fn resolve(&self, _resource: &str, keys: &[RecordKey]) -> ResourceResult<Vec<Record>> {
            let collection = self.collection.read().await;
            Ok(keys.iter().filter_map(|k| collection.record(k)).cloned().collect())
        }
    }

    struct Fixture {
        source: Source,
        sorted: Sorted,
        events: EventBus,
        sort: SortSpec,
    }

    impl Fixture {
        async fn new(ids: impl IntoIterator<Item = i64>) -> Self {
            let rows = ids.into_iter().map(|i| row([("id", Value::from(i))])).collect();
            Self::with_rows(rows, SortSpec::default()).await
        }

        async fn with_rows(rows: Vec<Row>, sort: SortSpec) -> Self {
            Self::build(rows, Filter::new(), sort).await
        }

        async fn build(rows: Vec<Row>, filter: Filter, sort: SortSpec) -> Self {
            let description = Arc::new(ResourceDescription::new("item", 10, &["id"]));
            let remote = MemoryRemote::new();
            remote.register((*description).clone()).await;
            remote.insert("item", rows.clone()).await.unwrap();

            let mut collection = Collection::new(description.clone(), DirtyFlag::new());
            collection.bulk_insert(rows);
            let collection = Arc::new(RwLock::new(collection));

            let events = EventBus::default();
            let ctx = PagerContext {
                collection: collection.clone(),
                events: events.clone(),
                gate: Arc::new(Mutex::new(())),
            };
            let sorted = Sorted::new(description, filter, sort.clone(), ctx);
            Self {
                source: Source { remote, collection },
                sorted,
                events,
                sort,
            }
        }

        async fn page(&self, page: usize) -> PageSlice {
            self.sorted
                .set_page(&self.source, &Paging::new(10, page, self.sort.clone()))
                .await
                .unwrap()
        }

        async fn queries(&self) -> usize {
            self.source.remote.query_count("item").await
        }

        async fn insert(&self, id: i64) {
            let data = self.source.remote.insert("item", vec![row([("id", id)])]).await.unwrap();
            let rows = data.new.get("item").cloned().unwrap_or_default();
            let inserted = self.source.collection.write().await.bulk_insert(rows).inserted;
            self.sorted.on_insert(&inserted).await;
        }

        async fn delete(&self, ids: &[i64]) {
            let keys: Vec<RecordKey> = ids.iter().map(|&i| RecordKey::from(i)).collect();
            self.source.remote.delete("item", &keys).await.unwrap();
            self.source.collection.write().await.delete(&keys);
            self.sorted.on_delete(&keys).await;
        }
    }

    /// 40 items, odd ids flagged, cache filtered on the flag
    async fn odd_fixture() -> Fixture {
        let rows = (1..=40)
            .map(|i| row([("id", Value::from(i)), ("odd", Value::from(i % 2 == 1))]))
            .collect();
        Fixture::build(rows, Filter::new().equals("odd", true), SortSpec::default()).await
    }

    /// Flag item `id` as odd on the server and sync it locally
    async fn flag_odd(fx: &Fixture, id: i64) -> usize {
        let data = fx
            .source
            .remote
            .insert("item", vec![row([("id", Value::from(id)), ("odd", Value::from(true))])])
            .await
            .unwrap();
        let rows = data.update.get("item").cloned().unwrap_or_default();
        let updated = fx.source.collection.write().await.bulk_update(rows);
        fx.sorted.on_update(&updated).await
    }

    fn ids(slice: &PageSlice) -> Vec<i64> {
        slice.records.iter().filter_map(|r| r.get("id").as_i64()).collect()
    }

    #[tokio::test]
    async fn test_last_partial_page() {
        let fx = Fixture::new(1..=25).await;

        let slice = fx.page(3).await;
        assert_eq!(ids(&slice), vec![21, 22, 23, 24, 25]);
        assert_eq!(slice.total_count, 25);

        let queries = fx.source.remote.queries("item").await;
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].page_number, 3);
    }

    #[tokio::test]
    async fn test_delete_compacts_last_page() {
        let fx = Fixture::new(1..=25).await;
        fx.page(2).await;
        fx.page(3).await;
        assert_eq!(fx.queries().await, 2);

        fx.delete(&[21, 22]).await;
        assert_eq!(fx.sorted.total_count().await, Some(23));

        let slice = fx.page(3).await;
        assert_eq!(ids(&slice), vec![23, 24, 25]);
        assert_eq!(slice.total_count, 23);
        assert_eq!(ids(&fx.page(2).await), (11..=20).collect::<Vec<_>>());
        assert_eq!(fx.queries().await, 2);
    }

    #[tokio::test]
    async fn test_delete_mid_page_refills_from_next() {
        let fx = Fixture::new(1..=30).await;
        fx.page(1).await;
        fx.page(2).await;
        fx.page(3).await;

        fx.delete(&[5]).await;
        assert_eq!(ids(&fx.page(1).await), vec![1, 2, 3, 4, 6, 7, 8, 9, 10, 11]);
        assert_eq!(ids(&fx.page(3).await), (22..=30).collect::<Vec<_>>());
        assert_eq!(fx.queries().await, 3);
    }

    #[tokio::test]
    async fn test_page_past_end_issues_no_query() {
        let fx = Fixture::new(1..=25).await;
        fx.page(1).await;

        let slice = fx.page(5).await;
        assert!(slice.records.is_empty());
        assert_eq!(slice.total_count, 25);
        assert_eq!(fx.queries().await, 1);
    }

    #[tokio::test]
    async fn test_insert_at_page_boundary() {
        let fx = Fixture::new((2..=60).step_by(2)).await;
        fx.page(1).await;
        fx.page(2).await;

        fx.insert(21).await;
        assert_eq!(fx.sorted.total_count().await, Some(31));

        // Page 1 is unchanged, 21 heads page 2, 40 waits for page 3
        assert_eq!(ids(&fx.page(1).await), (2..=20).step_by(2).collect::<Vec<_>>());
        let second = ids(&fx.page(2).await);
        assert_eq!(second[0], 21);
        assert_eq!(second.len(), 10);
        assert_eq!(*second.last().unwrap(), 38);
        assert_eq!(fx.queries().await, 2);

        let third = ids(&fx.page(3).await);
        assert_eq!(third[0], 40);
        assert!(fx.sorted.snapshot().await.pending().is_empty());
    }

    #[tokio::test]
    async fn test_update_moves_cached_key() {
        let rows = (1..=30).map(|i| row([("id", i), ("rank", i)])).collect();
        let fx = Fixture::with_rows(rows, SortSpec::parse(&["rank"]).unwrap()).await;
        for page in 1..=3 {
            fx.page(page).await;
        }

        let data = fx
            .source
            .remote
            .insert("item", vec![row([("id", 5), ("rank", 100)])])
            .await
            .unwrap();
        let rows = data.update.get("item").cloned().unwrap_or_default();
        let updated = fx.source.collection.write().await.bulk_update(rows);
        assert_eq!(fx.sorted.on_update(&updated).await, 1);

        assert_eq!(fx.sorted.total_count().await, Some(30));
        assert_eq!(ids(&fx.page(1).await), vec![1, 2, 3, 4, 6, 7, 8, 9, 10, 11]);
        let mut last: Vec<i64> = (22..=30).collect();
        last.push(5);
        assert_eq!(ids(&fx.page(3).await), last);
        assert_eq!(fx.queries().await, 3);
    }

    #[tokio::test]
    async fn test_pages_concatenate_to_full_result() {
        let fx = Fixture::new(1..=47).await;
        fx.page(1).await;
        fx.page(2).await;

        // 100 stays pending, 30 was never cached
        fx.insert(100).await;
        fx.delete(&[3, 30]).await;
        assert_eq!(fx.sorted.snapshot().await.pending().len(), 1);

        let mut all = Vec::new();
        for page in 1..=5 {
            all.extend(ids(&fx.page(page).await));
        }
        let mut expected: Vec<i64> = (1..=47).filter(|i| *i != 3 && *i != 30).collect();
        expected.push(100);
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn test_concurrent_loads_coalesce() {
        let fx = Fixture::new(1..=25).await;
        fx.source.remote.set_latency(Some(Duration::from_millis(20))).await;

        let paging = Paging::new(10, 1, SortSpec::default());
        let (a, b) = tokio::join!(
            fx.sorted.set_page(&fx.source, &paging),
            fx.sorted.set_page(&fx.source, &paging)
        );
        assert_eq!(ids(&a.unwrap()), ids(&b.unwrap()));
        assert_eq!(fx.queries().await, 1);
    }

    #[tokio::test]
    async fn test_refresh_skipped_when_complete() {
        let fx = Fixture::new(1..=25).await;
        fx.page(1).await;
        assert!(fx.sorted.refresh(&fx.source).await.unwrap());
        assert_eq!(fx.queries().await, 2);
        assert_eq!(ids(&fx.page(1).await), (1..=10).collect::<Vec<_>>());

        fx.page(2).await;
        fx.page(3).await;
        assert!(fx.sorted.is_complete().await);
        let before = fx.queries().await;
        assert!(!fx.sorted.refresh(&fx.source).await.unwrap());
        assert_eq!(fx.queries().await, before);
    }

    #[tokio::test]
    async fn test_failed_query_keeps_state() {
        let fx = Fixture::new(1..=25).await;
        fx.page(1).await;
        fx.source
            .remote
            .fail_next(RemoteError::Unavailable("down".into()))
            .await;

        let err = fx
            .sorted
            .set_page(&fx.source, &Paging::new(10, 2, SortSpec::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::resources::ResourceError::Remote(RemoteError::Unavailable(_))));
        assert_eq!(fx.sorted.snapshot().await.cached_pages(), vec![0]);
        assert_eq!(ids(&fx.page(2).await), (11..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_shifted_page_reports_inconsistency() {
        let fx = Fixture::new(1..=30).await;
        let mut stream = fx.events.subscribe(["inconsistency-item"]);
        fx.page(1).await;
        fx.page(2).await;

        // Server-side insert the cache never heard of
        fx.source.remote.insert("item", vec![row([("id", 0)])]).await.unwrap();
        fx.source.collection.write().await.bulk_insert(vec![row([("id", 0)])]);
        fx.sorted.ensure_page(&fx.source, 1, true).await.unwrap();

        let event = stream.try_recv().expect("inconsistency event");
        assert_eq!(event.topic, "inconsistency-item");
    }

    #[tokio::test]
    async fn test_window_rpp_differs_from_outer_rpp() {
        let fx = Fixture::new(1..=25).await;
        let slice = fx
            .sorted
            .set_page(&fx.source, &Paging::new(4, 3, SortSpec::default()))
            .await
            .unwrap();
        assert_eq!(ids(&slice), vec![9, 10, 11, 12]);

        let pages: Vec<usize> = fx
            .source
            .remote
            .queries("item")
            .await
            .iter()
            .map(|p| p.page_number)
            .collect();
        assert_eq!(pages, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_update_entering_complete_filter() {
        let fx = odd_fixture().await;
        fx.page(1).await;
        fx.page(2).await;
        assert!(fx.sorted.is_complete().await);

        assert_eq!(flag_odd(&fx, 30).await, 1);
        assert!(!fx.sorted.is_complete().await);
        assert_eq!(fx.sorted.total_count().await, Some(21));

        let second = fx.page(2).await;
        assert_eq!(second.total_count, 21);
        assert_eq!(ids(&second), vec![21, 23, 25, 27, 29, 30, 31, 33, 35, 37]);
    }

    #[tokio::test]
    async fn test_update_entering_partial_filter_requeries() {
        let fx = odd_fixture().await;
        assert_eq!(ids(&fx.page(1).await), (1..=19).step_by(2).collect::<Vec<_>>());

        assert_eq!(flag_odd(&fx, 30).await, 0);
        assert!(fx.sorted.snapshot().await.is_incomplete(0));

        let second = fx.page(2).await;
        assert_eq!(second.total_count, 21);
        assert_eq!(ids(&second), vec![21, 23, 25, 27, 29, 30, 31, 33, 35, 37]);
        assert_eq!(fx.queries().await, 2);
    }
}
