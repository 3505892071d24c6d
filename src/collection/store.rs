//! Per-resource record store
//!
//! Owns every materialized record of one resource. Records live in an arena
//! keyed by `RecordId`; indexes only ever hold ids, so a record is stored
//! exactly once no matter how many indexes point at it.

use crate::collection::many_to_many::ManyToMany;
use crate::collection::multi_index::MultiIndex;
use crate::collection::tracker::{DirtyFlag, FetchTracker};
use crate::collection::{Index, RecordId};
use crate::model::{Filter, Record, RecordKey, Reference, ResourceDescription, Row, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Secondary index kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Single,
    Multi,
    ManyToMany,
}

#[derive(Debug, Clone)]
pub enum CollectionIndex {
    Single(Index),
    Multi(MultiIndex),
    ManyToMany(ManyToMany),
}

impl CollectionIndex {
    pub fn kind(&self) -> IndexKind {
        match self {
            CollectionIndex::Single(_) => IndexKind::Single,
            CollectionIndex::Multi(_) => IndexKind::Multi,
            CollectionIndex::ManyToMany(_) => IndexKind::ManyToMany,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CollectionIndex::Single(i) => i.len(),
            CollectionIndex::Multi(i) => i.len(),
            CollectionIndex::ManyToMany(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something the collection was asked for but does not hold
#[derive(Debug, Clone, PartialEq)]
pub enum MissingFilter {
    /// Records to fetch with this filter
    Records(Filter),
    /// Many-to-many links to fetch for `keys`
    Links {
        attribute: String,
        keys: Vec<Value>,
        reference: Option<Reference>,
    },
}

/// Outcome of a bulk ingestion
#[derive(Debug, Clone, Default)]
pub struct BulkInsert {
    pub inserted: Vec<Record>,
    pub updated: Vec<Record>,
}

impl BulkInsert {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub resource: String,
    pub records: usize,
    pub indexes: HashMap<String, (IndexKind, usize)>,
}

pub struct Collection {
    description: Arc<ResourceDescription>,
    records: HashMap<RecordId, Record>,
    /// Insertion order
    rows: Vec<RecordId>,
    primary: Index,
    indexes: HashMap<String, CollectionIndex>,
    primary_tracker: FetchTracker<RecordKey>,
    trackers: HashMap<String, FetchTracker<Value>>,
    dirty: DirtyFlag,
    next_id: u64,
}

impl Collection {
    pub fn new(description: Arc<ResourceDescription>, dirty: DirtyFlag) -> Self {
        let primary = Index::compound(description.primary_key.clone());
        tracing::info!(resource = %description.name, "Creating collection");
        Self {
            description,
            records: HashMap::new(),
            rows: Vec::new(),
            primary,
            indexes: HashMap::new(),
            primary_tracker: FetchTracker::new(),
            trackers: HashMap::new(),
            dirty,
            next_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn description(&self) -> &Arc<ResourceDescription> {
        &self.description
    }

    pub fn primary_key(&self) -> &[String] {
        &self.description.primary_key
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter().filter_map(|id| self.records.get(id))
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.primary.contains(key)
    }

    /// Look a record up by primary key without tracking misses
    pub fn record(&self, key: &RecordKey) -> Option<&Record> {
        self.primary.get(key).and_then(|id| self.records.get(&id))
    }

    /// Add a record; an existing record with the same key is synced instead
    pub fn add(&mut self, record: Record) -> RecordId {
        let key = self.primary.key_of(&record);
        if let Some(id) = self.primary.get(&key) {
            if let Some(existing) = self.records.get_mut(&id) {
                existing.sync(record.fields());
            }
            return id;
        }

        let id = RecordId(self.next_id);
        self.next_id += 1;

        self.primary.add(id, &record);
        for index in self.indexes.values_mut() {
            match index {
                CollectionIndex::Single(i) => i.add(id, &record),
                CollectionIndex::Multi(i) => i.add(id, &record),
                CollectionIndex::ManyToMany(_) => {}
            }
        }
        self.primary_tracker.forget(&key);
        self.records.insert(id, record);
        self.rows.push(id);
        id
    }

    /// Remove records by primary key, returning what was removed
    pub fn delete(&mut self, keys: &[RecordKey]) -> Vec<Record> {
        let mut removed = Vec::new();
        for key in keys {
            let Some(id) = self.primary.get(key) else {
                continue;
            };
            let Some(record) = self.records.remove(&id) else {
                continue;
            };
            self.primary.unlink(id, &record);
            for index in self.indexes.values_mut() {
                match index {
                    CollectionIndex::Single(i) => i.unlink(id, &record),
                    CollectionIndex::Multi(i) => i.unlink(id, &record),
                    CollectionIndex::ManyToMany(_) => {}
                }
            }
            removed.push(record);
        }
        if !removed.is_empty() {
            let records = &self.records;
            self.rows.retain(|id| records.contains_key(id));
            tracing::debug!(resource = %self.name(), count = removed.len(), "Deleted records");
        }
        removed
    }

    /// Look records up by primary key, tracking misses for gap-fill
    pub fn get_many(&mut self, keys: &[RecordKey]) -> Vec<Option<Record>> {
        let mut touched = false;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match self.primary.get(key).and_then(|id| self.records.get(&id)) {
                Some(record) => out.push(Some(record.clone())),
                None => {
                    touched |= self.primary_tracker.mark(key);
                    out.push(None);
                }
            }
        }
        if touched {
            self.dirty.touch();
        }
        out
    }

    pub fn get(&mut self, key: &RecordKey) -> Option<Record> {
        self.get_many(std::slice::from_ref(key)).pop().flatten()
    }

    /// Look records up through a secondary index, tracking misses
    ///
    /// Returns `None` when no index exists on `field`.
    pub fn lookup(&mut self, field: &str, value: &Value) -> Option<Vec<Record>> {
        let ids: Vec<RecordId> = match self.indexes.get(field)? {
            CollectionIndex::Single(i) => i.get(&RecordKey::from(value.clone())).into_iter().collect(),
            CollectionIndex::Multi(i) => i.get(value).to_vec(),
            CollectionIndex::ManyToMany(_) => return None,
        };
        if ids.is_empty() {
            self.mark_value(field, value);
        }
        Some(ids.iter().filter_map(|id| self.records.get(id)).cloned().collect())
    }

    /// Remote keys linked to `local` through a many-to-many attribute
    ///
    /// Unknown locals are tracked so their links get fetched.
    pub fn linked(&mut self, attribute: &str, local: &Value) -> Option<Vec<Value>> {
        let CollectionIndex::ManyToMany(m2m) = self.indexes.get(attribute)? else {
            return None;
        };
        let links: Option<Vec<Value>> = m2m.get(local).map(|set| set.iter().cloned().collect());
        match links {
            Some(links) => Some(links),
            None => {
                self.mark_value(attribute, local);
                Some(Vec::new())
            }
        }
    }

    fn mark_value(&mut self, field: &str, value: &Value) {
        if self
            .trackers
            .entry(field.to_string())
            .or_default()
            .mark(value)
        {
            self.dirty.touch();
        }
    }

    /// Records matching `filter`, in insertion order
    ///
    /// Narrows candidates through a single-value index, then a multi index,
    /// then falls back to a full scan. Candidates are always re-tested against
    /// the whole filter.
    pub fn find(&self, filter: &Filter) -> Vec<Record> {
        let ids = self.candidates(filter);
        let mut out: Vec<&Record> = match ids {
            Some(ids) => ids.iter().filter_map(|id| self.records.get(id)).collect(),
            None => self.iter().collect(),
        };
        out.retain(|r| filter.matches(r));
        out.into_iter().cloned().collect()
    }

    fn candidates(&self, filter: &Filter) -> Option<Vec<RecordId>> {
        let pk = self.primary_key();
        if pk.len() == 1 {
            if let Some(values) = filter.values(&pk[0]) {
                return Some(self.ordered(
                    values
                        .iter()
                        .filter_map(|v| self.primary.get(&RecordKey::from(v.clone()))),
                ));
            }
        }
        for (field, values) in filter.iter() {
            if let Some(CollectionIndex::Single(index)) = self.indexes.get(field) {
                return Some(self.ordered(
                    values
                        .iter()
                        .filter_map(|v| index.get(&RecordKey::from(v.clone()))),
                ));
            }
        }
        for (field, values) in filter.iter() {
            if let Some(CollectionIndex::Multi(index)) = self.indexes.get(field) {
                return Some(self.ordered(values.iter().flat_map(|v| index.get(v).iter().copied())));
            }
        }
        None
    }

    /// Restore insertion order over a set of ids
    fn ordered(&self, ids: impl Iterator<Item = RecordId>) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = ids.collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Ingest server rows: add new ones, sync known ones
    ///
    /// Index entries of changed fields are relocated before the new values are
    /// applied. Later rows win when the batch repeats a key.
    pub fn bulk_insert(&mut self, rows: Vec<Row>) -> BulkInsert {
        let mut result = BulkInsert::default();
        let mut seen: HashMap<RecordKey, usize> = HashMap::new();
        let mut batch: Vec<Row> = Vec::with_capacity(rows.len());
        let pk = self.primary_key().to_vec();
        for row in rows {
            let key = RecordKey::new(pk.iter().map(|f| row.get(f).cloned().unwrap_or_default()).collect());
            match seen.get(&key) {
                Some(&pos) => batch[pos] = row,
                None => {
                    seen.insert(key, batch.len());
                    batch.push(row);
                }
            }
        }

        for row in batch {
            let key = RecordKey::new(pk.iter().map(|f| row.get(f).cloned().unwrap_or_default()).collect());
            match self.primary.get(&key) {
                Some(id) => {
                    if let Some(record) = self.apply_row(id, &row) {
                        result.updated.push(record);
                    }
                }
                None => {
                    let record = Record::from_row(row);
                    self.add(record.clone());
                    result.inserted.push(record);
                }
            }
        }

        if !result.is_empty() {
            tracing::debug!(
                resource = %self.name(),
                inserted = result.inserted.len(),
                updated = result.updated.len(),
                "Bulk insert"
            );
        }
        result
    }

    /// Sync rows of records already held; unknown keys are ignored
    pub fn bulk_update(&mut self, rows: Vec<Row>) -> Vec<Record> {
        let pk = self.primary_key().to_vec();
        rows.iter()
            .filter_map(|row| {
                let key = RecordKey::new(pk.iter().map(|f| row.get(f).cloned().unwrap_or_default()).collect());
                let id = self.primary.get(&key)?;
                self.apply_row(id, row)
            })
            .collect()
    }

    /// Relocate index entries for changed fields, then sync the row
    ///
    /// Returns the updated record when anything changed.
    fn apply_row(&mut self, id: RecordId, row: &Row) -> Option<Record> {
        let record = self.records.get_mut(&id)?;
        let changes = record.diff(row);
        if changes.is_empty() {
            return None;
        }
        for change in &changes {
            match self.indexes.get_mut(&change.field) {
                Some(CollectionIndex::Single(index)) => index.relocate(
                    id,
                    &RecordKey::from(change.old.clone()),
                    RecordKey::from(change.new.clone()),
                ),
                Some(CollectionIndex::Multi(index)) => {
                    index.relocate(id, &change.old, change.new.clone())
                }
                _ => {}
            }
        }
        record.sync(row);
        Some(record.clone())
    }

    /// Apply a local mutation and reindex the record
    ///
    /// The mutated values become the record's synced state.
    pub fn update<F>(&mut self, key: &RecordKey, mutate: F) -> Option<Record>
    where
        F: FnOnce(&mut Record),
    {
        let id = self.primary.get(key)?;
        let record = self.records.get_mut(&id)?;
        mutate(record);

        self.primary.update(id, record);
        for index in self.indexes.values_mut() {
            match index {
                CollectionIndex::Single(i) => {
                    i.update(id, record);
                }
                CollectionIndex::Multi(i) => {
                    i.update(id, record);
                }
                CollectionIndex::ManyToMany(_) => {}
            }
        }
        record.mark_synced();
        Some(record.clone())
    }

    /// Create (or return) a single-value index over `field`
    pub fn add_index(&mut self, field: &str) -> &CollectionIndex {
        self.ensure_index(field, IndexKind::Single)
    }

    /// Create (or return) a multi-value index over `field`
    pub fn add_multi_index(&mut self, field: &str) -> &CollectionIndex {
        self.ensure_index(field, IndexKind::Multi)
    }

    /// Create (or return) a many-to-many index for `attribute`
    pub fn add_many_to_many(&mut self, attribute: &str) -> &CollectionIndex {
        self.ensure_index(attribute, IndexKind::ManyToMany)
    }

    fn ensure_index(&mut self, field: &str, kind: IndexKind) -> &CollectionIndex {
        if !self.indexes.contains_key(field) {
            let rows = self
                .rows
                .iter()
                .filter_map(|id| self.records.get(id).map(|r| (*id, r)));
            let index = match kind {
                IndexKind::Single => {
                    let mut index = Index::new(field);
                    index.reindex_all(rows);
                    CollectionIndex::Single(index)
                }
                IndexKind::Multi => {
                    let mut index = MultiIndex::new(field);
                    index.reindex_all(rows);
                    CollectionIndex::Multi(index)
                }
                IndexKind::ManyToMany => CollectionIndex::ManyToMany(ManyToMany::new(
                    field,
                    self.description.references.get(field).cloned(),
                )),
            };
            self.indexes.insert(field.to_string(), index);
        }
        &self.indexes[field]
    }

    pub fn get_index(&self, field: &str) -> Option<&CollectionIndex> {
        self.indexes.get(field)
    }

    /// Drop an index; returns true if one existed
    pub fn delete_index(&mut self, field: &str) -> bool {
        self.trackers.remove(field);
        self.indexes.remove(field).is_some()
    }

    /// Add many-to-many links, creating the index on first use
    pub fn link(&mut self, attribute: &str, local: Value, remotes: Vec<Value>) {
        if let Some(m2m) = self.ensure_m2m(attribute) {
            m2m.add(local, remotes);
        }
    }

    /// Remove many-to-many links
    pub fn unlink(&mut self, attribute: &str, local: &Value, remotes: Vec<Value>) {
        if let Some(m2m) = self.ensure_m2m(attribute) {
            m2m.del(local, remotes);
        }
    }

    /// Record that `local` has been answered for, even with no links
    pub fn touch_links(&mut self, attribute: &str, local: Value) {
        if let Some(m2m) = self.ensure_m2m(attribute) {
            m2m.touch(local);
        }
    }

    /// `None` when `attribute` already carries another index kind
    fn ensure_m2m(&mut self, attribute: &str) -> Option<&mut ManyToMany> {
        self.ensure_index(attribute, IndexKind::ManyToMany);
        match self.indexes.get_mut(attribute) {
            Some(CollectionIndex::ManyToMany(m2m)) => Some(m2m),
            _ => None,
        }
    }

    /// Drain everything that lookups missed since the last call
    pub fn missing_filters(&mut self) -> Vec<MissingFilter> {
        let mut out = Vec::new();
        let keys = self.primary_tracker.take();
        if !keys.is_empty() {
            out.push(MissingFilter::Records(Filter::by_keys(self.primary_key(), &keys)));
        }

        let mut fields: Vec<String> = self.trackers.keys().cloned().collect();
        fields.sort();
        for field in fields {
            let Some(tracker) = self.trackers.get_mut(&field) else {
                continue;
            };
            let values = tracker.take();
            if values.is_empty() {
                continue;
            }
            match self.indexes.get(&field) {
                Some(CollectionIndex::ManyToMany(m2m)) => out.push(MissingFilter::Links {
                    attribute: field,
                    keys: values,
                    reference: m2m.reference().cloned(),
                }),
                Some(_) => out.push(MissingFilter::Records(Filter::new().any_of(field, values))),
                None => {}
            }
        }
        out
    }

    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            resource: self.name().to_string(),
            records: self.len(),
            indexes: self
                .indexes
                .iter()
                .map(|(name, index)| (name.clone(), (index.kind(), index.len())))
                .collect(),
        }
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("resource", &self.name())
            .field("records", &self.len())
            .field("indexes", &self.indexes.keys().collect::<Vec<_>>())
            .finish()
    }
}
