//! Single-value index
//!
//! Maps a (possibly compound) field key to at most one record. Used for the
//! primary key and for any unique field.
//!
//! # Key changes
//! A record whose indexed field changed locally still sits under its old key.
//! `update` compares the last-synced key with the live one and relocates the
//! entry; `relocate` does the same when the caller already knows both keys
//! (bulk ingestion, which must move entries *before* applying new values).

use crate::collection::RecordId;
use crate::model::{Record, RecordKey};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Index {
    fields: Vec<String>,
    idx: HashMap<RecordKey, RecordId>,
}

impl Index {
    /// Index over one field
    pub fn new(field: impl Into<String>) -> Self {
        Self::compound(vec![field.into()])
    }

    /// Index over several fields, keyed by their composed values
    pub fn compound(fields: Vec<String>) -> Self {
        tracing::info!(fields = ?fields, "Creating single index");
        Self {
            fields,
            idx: HashMap::new(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn key_of(&self, record: &Record) -> RecordKey {
        record.key(&self.fields)
    }

    /// Rebuild from scratch
    pub fn reindex_all<'a>(&mut self, rows: impl IntoIterator<Item = (RecordId, &'a Record)>) {
        self.idx = rows
            .into_iter()
            .map(|(id, record)| (record.key(&self.fields), id))
            .collect();
    }

    pub fn add(&mut self, id: RecordId, record: &Record) {
        self.idx.insert(self.key_of(record), id);
    }

    pub fn get(&self, key: &RecordKey) -> Option<RecordId> {
        self.idx.get(key).copied()
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.idx.contains_key(key)
    }

    /// Relocate a record whose live key drifted from its synced key
    ///
    /// Returns true if the entry moved.
    pub fn update(&mut self, id: RecordId, record: &Record) -> bool {
        let old = record.synced_key(&self.fields);
        let new = self.key_of(record);
        if old == new {
            return false;
        }
        self.relocate(id, &old, new);
        true
    }

    /// Move `id` from `old` to `new`
    pub fn relocate(&mut self, id: RecordId, old: &RecordKey, new: RecordKey) {
        if self.idx.get(old) == Some(&id) {
            self.idx.remove(old);
        }
        tracing::debug!(fields = ?self.fields, from = %old, to = %new, "Relocating index entry");
        self.idx.insert(new, id);
    }

    /// Remove the record by its current key
    pub fn unlink(&mut self, id: RecordId, record: &Record) {
        for key in [self.key_of(record), record.synced_key(&self.fields)] {
            if self.idx.get(&key) == Some(&id) {
                self.idx.remove(&key);
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.idx.keys()
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }
}
