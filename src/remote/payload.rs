//! Server payloads
//!
//! `ServerData` is what the server pushes (or answers) to keep the local
//! cache in sync. All sections are optional.
//!
//! ```json
//! {
//!   "description": [{"name": "item", "rpp": 10, "$pk": ["id"]}],
//!   "delete":  {"item": [3, 4]},
//!   "new":     {"item": [{"id": 30, "name": "x"}]},
//!   "update":  {"item": [{"id": 5, "name": "y"}]},
//!   "results": {"item": [{"id": 6, "name": "z"}]},
//!   "m2m":     {"item": {"tags": {"add": [[1, 10]], "del": [[1, 11]]}}}
//! }
//! ```

use crate::model::{RecordKey, ResourceDescription, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Link changes for one many-to-many attribute, as `(local, remote)` pairs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<(Value, Value)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub del: Vec<(Value, Value)>,
}

impl LinkChanges {
    /// Group pairs by local key
    pub fn grouped(pairs: &[(Value, Value)]) -> BTreeMap<Value, Vec<Value>> {
        let mut out: BTreeMap<Value, Vec<Value>> = BTreeMap::new();
        for (local, remote) in pairs {
            out.entry(local.clone()).or_default().push(remote.clone());
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub description: Vec<ResourceDescription>,
    /// Resource → removed primary keys
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub delete: BTreeMap<String, Vec<RecordKey>>,
    /// Resource → rows created on the server
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub new: BTreeMap<String, Vec<Row>>,
    /// Resource → rows changed on the server
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub update: BTreeMap<String, Vec<Row>>,
    /// Resource → rows answering a fetch
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, Vec<Row>>,
    /// Resource → attribute → link changes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub m2m: BTreeMap<String, BTreeMap<String, LinkChanges>>,
}

impl ServerData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(mut self, description: ResourceDescription) -> Self {
        self.description.push(description);
        self
    }

    pub fn with_delete(mut self, resource: &str, keys: Vec<RecordKey>) -> Self {
        self.delete.entry(resource.to_string()).or_default().extend(keys);
        self
    }

    pub fn with_new(mut self, resource: &str, rows: Vec<Row>) -> Self {
        self.new.entry(resource.to_string()).or_default().extend(rows);
        self
    }

    pub fn with_update(mut self, resource: &str, rows: Vec<Row>) -> Self {
        self.update.entry(resource.to_string()).or_default().extend(rows);
        self
    }

    pub fn with_results(mut self, resource: &str, rows: Vec<Row>) -> Self {
        self.results.entry(resource.to_string()).or_default().extend(rows);
        self
    }

    pub fn with_links(mut self, resource: &str, attribute: &str, changes: LinkChanges) -> Self {
        let entry = self
            .m2m
            .entry(resource.to_string())
            .or_default()
            .entry(attribute.to_string())
            .or_default();
        entry.add.extend(changes.add);
        entry.del.extend(changes.del);
        self
    }

    /// Merge another payload into this one
    pub fn merge(mut self, other: ServerData) -> Self {
        self.description.extend(other.description);
        for (res, keys) in other.delete {
            self = self.with_delete(&res, keys);
        }
        for (res, rows) in other.new {
            self = self.with_new(&res, rows);
        }
        for (res, rows) in other.update {
            self = self.with_update(&res, rows);
        }
        for (res, rows) in other.results {
            self = self.with_results(&res, rows);
        }
        for (res, attrs) in other.m2m {
            for (attr, changes) in attrs {
                self = self.with_links(&res, &attr, changes);
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_empty()
            && self.delete.is_empty()
            && self.new.is_empty()
            && self.update.is_empty()
            && self.results.is_empty()
            && self.m2m.is_empty()
    }
}

/// One outer page of primary keys answered by a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPage {
    pub pks: Vec<RecordKey>,
    pub total_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_payload() {
        let json = r#"{
            "description": [{"name": "item", "rpp": 10, "$pk": ["id"]}],
            "delete": {"item": [3, 4]},
            "new": {"item": [{"id": 30, "name": "x"}]},
            "m2m": {"item": {"tags": {"add": [[1, 10], [1, 11]], "del": [[2, 10]]}}}
        }"#;
        let data: ServerData = serde_json::from_str(json).unwrap();

        assert_eq!(data.description[0].name, "item");
        assert_eq!(data.delete["item"], vec![RecordKey::from(3), RecordKey::from(4)]);
        assert_eq!(data.new["item"][0]["name"], Value::from("x"));

        let tags = &data.m2m["item"]["tags"];
        let grouped = LinkChanges::grouped(&tags.add);
        assert_eq!(grouped[&Value::from(1)], vec![Value::from(10), Value::from(11)]);
        assert_eq!(tags.del.len(), 1);
        assert!(data.update.is_empty());
    }

    #[test]
    fn test_composite_delete_keys() {
        let json = r#"{"delete": {"pair": [[1, "a"], [2, "b"]]}}"#;
        let data: ServerData = serde_json::from_str(json).unwrap();
        let key = &data.delete["pair"][0];
        assert!(key.is_composite());
        assert_eq!(key.to_string(), "1-a");
    }

    #[test]
    fn test_merge() {
        let a = ServerData::new().with_delete("item", vec![RecordKey::from(1)]);
        let b = ServerData::new().with_delete("item", vec![RecordKey::from(2)]);
        let merged = a.merge(b);
        assert_eq!(merged.delete["item"].len(), 2);
        assert!(!merged.is_empty());
        assert!(ServerData::new().is_empty());
    }
}
