//! Materialized records
//!
//! A `Record` is a generic field map interpreted through its resource
//! description. It keeps two copies of its fields: the live values, which
//! callers may mutate, and the values last synced from the server. Index
//! maintenance compares the two to detect key changes.

use crate::model::value::{RecordKey, Value};
use serde::Serialize;
use std::collections::BTreeMap;

/// Raw row as received from the server
pub type Row = BTreeMap<String, Value>;

static NULL: Value = Value::Null;

/// Build a row from `(field, value)` pairs
pub fn row<K, V, I>(pairs: I) -> Row
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A field whose live value differs from an incoming row
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// One materialized entity of a resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    fields: Row,
    #[serde(skip)]
    synced: Row,
}

impl Record {
    /// Create a record whose live and synced values are both `row`
    pub fn from_row(row: Row) -> Self {
        Self {
            synced: row.clone(),
            fields: row,
        }
    }

    /// Live value of a field (`Null` when absent)
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }

    /// Value of a field as last synced from the server
    pub fn synced(&self, field: &str) -> &Value {
        self.synced.get(field).unwrap_or(&NULL)
    }

    /// Mutate a live value without syncing it
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Merge an incoming row into both live and synced values
    pub fn sync(&mut self, row: &Row) {
        for (k, v) in row {
            self.fields.insert(k.clone(), v.clone());
        }
        self.synced = self.fields.clone();
    }

    /// Accept the live values as the new synced state
    pub fn mark_synced(&mut self) {
        self.synced = self.fields.clone();
    }

    /// Compose the live key over `fields`
    pub fn key(&self, fields: &[String]) -> RecordKey {
        RecordKey::new(fields.iter().map(|f| self.get(f).clone()).collect())
    }

    /// Compose the last-synced key over `fields`
    pub fn synced_key(&self, fields: &[String]) -> RecordKey {
        RecordKey::new(fields.iter().map(|f| self.synced(f).clone()).collect())
    }

    /// Fields of `row` whose value differs from the live value
    pub fn diff(&self, row: &Row) -> Vec<FieldChange> {
        row.iter()
            .filter(|(k, v)| self.get(k) != *v)
            .map(|(k, v)| FieldChange {
                field: k.clone(),
                old: self.get(k).clone(),
                new: v.clone(),
            })
            .collect()
    }

    pub fn fields(&self) -> &Row {
        &self.fields
    }
}

impl From<Row> for Record {
    fn from(row: Row) -> Self {
        Record::from_row(row)
    }
}
