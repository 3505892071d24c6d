//! Multi-value index
//!
//! Maps a field value to the ordered list of records sharing it. Buckets keep
//! collection insertion order. A record lives in exactly one bucket, the one
//! matching its current value.
//!
//! Moving a record scans its bucket linearly: O(bucket size).

use crate::collection::RecordId;
use crate::model::{Record, Value};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MultiIndex {
    field: String,
    idx: HashMap<Value, Vec<RecordId>>,
}

impl MultiIndex {
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        tracing::info!(field = %field, "Creating multi index");
        Self {
            field,
            idx: HashMap::new(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn reindex_all<'a>(&mut self, rows: impl IntoIterator<Item = (RecordId, &'a Record)>) {
        self.idx.clear();
        for (id, record) in rows {
            self.add(id, record);
        }
    }

    pub fn add(&mut self, id: RecordId, record: &Record) {
        self.idx
            .entry(record.get(&self.field).clone())
            .or_default()
            .push(id);
    }

    /// Records sharing `value`, in insertion order
    pub fn get(&self, value: &Value) -> &[RecordId] {
        self.idx.get(value).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.idx.contains_key(value)
    }

    /// Move a record whose live value drifted from its synced value
    pub fn update(&mut self, id: RecordId, record: &Record) -> bool {
        let old = record.synced(&self.field);
        let new = record.get(&self.field);
        if old == new {
            return false;
        }
        let (old, new) = (old.clone(), new.clone());
        self.relocate(id, &old, new);
        true
    }

    /// Move `id` from bucket `old` to the end of bucket `new`
    pub fn relocate(&mut self, id: RecordId, old: &Value, new: Value) {
        if !self.remove_from(old, id) {
            // Not where it should be: fall back to a full scan
            let found = self
                .idx
                .iter()
                .find(|(_, ids)| ids.contains(&id))
                .map(|(value, _)| value.clone());
            match found {
                Some(value) => {
                    self.remove_from(&value, id);
                }
                None => {
                    tracing::warn!(field = %self.field, old = %old, "Old key not found in multi index");
                }
            }
        }
        self.idx.entry(new).or_default().push(id);
    }

    pub fn unlink(&mut self, id: RecordId, record: &Record) {
        if !self.remove_from(record.get(&self.field), id) {
            self.remove_from(record.synced(&self.field), id);
        }
    }

    fn remove_from(&mut self, value: &Value, id: RecordId) -> bool {
        let Some(bucket) = self.idx.get_mut(value) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|x| *x == id) else {
            return false;
        };
        bucket.remove(pos);
        if bucket.is_empty() {
            self.idx.remove(value);
        }
        true
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::row;

    fn rec(id: i64, group: &str) -> Record {
        Record::from_row(row([("id", Value::from(id)), ("group", group.into())]))
    }

    #[test]
    fn test_buckets_keep_insertion_order() {
        let mut index = MultiIndex::new("group");
        index.add(RecordId(1), &rec(1, "x"));
        index.add(RecordId(2), &rec(2, "y"));
        index.add(RecordId(3), &rec(3, "x"));

        assert_eq!(index.get(&Value::from("x")), &[RecordId(1), RecordId(3)]);
        assert_eq!(index.get(&Value::from("y")), &[RecordId(2)]);
        assert!(index.get(&Value::from("z")).is_empty());
    }

    #[test]
    fn test_update_moves_between_buckets() {
        let mut index = MultiIndex::new("group");
        let mut a = rec(1, "x");
        index.add(RecordId(1), &a);
        index.add(RecordId(2), &rec(2, "x"));
        index.add(RecordId(3), &rec(3, "x"));

        a.set("group", "y");
        assert!(index.update(RecordId(1), &a));

        // Remaining items keep their relative order
        assert_eq!(index.get(&Value::from("x")), &[RecordId(2), RecordId(3)]);
        assert_eq!(index.get(&Value::from("y")), &[RecordId(1)]);
    }

    #[test]
    fn test_relocate_drops_empty_bucket() {
        let mut index = MultiIndex::new("group");
        index.add(RecordId(1), &rec(1, "x"));
        index.relocate(RecordId(1), &Value::from("x"), Value::from("y"));

        assert!(!index.contains(&Value::from("x")));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_relocate_with_stale_old_key_scans() {
        let mut index = MultiIndex::new("group");
        index.add(RecordId(1), &rec(1, "x"));
        index.relocate(RecordId(1), &Value::from("wrong"), Value::from("y"));

        assert!(!index.contains(&Value::from("x")));
        assert_eq!(index.get(&Value::from("y")), &[RecordId(1)]);
    }

    #[test]
    fn test_unlink() {
        let mut index = MultiIndex::new("group");
        let a = rec(1, "x");
        index.add(RecordId(1), &a);
        index.add(RecordId(2), &rec(2, "x"));
        index.unlink(RecordId(1), &a);

        assert_eq!(index.get(&Value::from("x")), &[RecordId(2)]);
    }
}
