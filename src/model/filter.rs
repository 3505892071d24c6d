//! Record filters
//!
//! A filter maps field names to sets of accepted values: OR within a field,
//! AND across fields. The empty filter accepts everything.

use crate::model::record::Record;
use crate::model::value::{RecordKey, Value};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Field → accepted values
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, Vec<Value>>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Value>),
    One(Value),
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
        Ok(Filter(
            raw.into_iter()
                .map(|(k, v)| match v {
                    OneOrMany::Many(values) => (k, values),
                    OneOrMany::One(value) => (k, vec![value]),
                })
                .collect(),
        ))
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: field must equal `value`
    pub fn equals(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.any_of(field, [value.into()])
    }

    /// Builder method: field must be one of `values`
    pub fn any_of<V, I>(mut self, field: impl Into<String>, values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let mut values: Vec<Value> = values.into_iter().map(Into::into).collect();
        values.sort();
        values.dedup();
        self.0.insert(field.into(), values);
        self
    }

    /// Filter selecting the given primary keys
    ///
    /// Composite keys are expressed per field, which may over-select; callers
    /// re-test locally.
    pub fn by_keys(primary_key: &[String], keys: &[RecordKey]) -> Self {
        let mut filter = Filter::new();
        for (i, field) in primary_key.iter().enumerate() {
            let values: Vec<Value> = keys
                .iter()
                .filter_map(|k| k.values().get(i).cloned())
                .collect();
            filter = filter.any_of(field.clone(), values);
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn values(&self, field: &str) -> Option<&[Value]> {
        self.0.get(field).map(|v| v.as_slice())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Value>)> {
        self.0.iter()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.0
            .iter()
            .all(|(field, accepted)| accepted.contains(record.get(field)))
    }

    /// Stable textual key, independent of construction order
    pub fn cache_key(&self) -> String {
        self.0
            .iter()
            .map(|(field, values)| {
                let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("{}:{}", field, joined.join(","))
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::row;

    fn person(id: i64, first: &str, last: &str) -> Record {
        Record::from_row(row([
            ("id", Value::from(id)),
            ("first", first.into()),
            ("last", last.into()),
        ]))
    }

    #[test]
    fn test_and_of_ors() {
        let filter = Filter::new()
            .any_of("first", ["mario", "luigi"])
            .equals("last", "bros");

        assert!(filter.matches(&person(1, "mario", "bros")));
        assert!(filter.matches(&person(2, "luigi", "bros")));
        assert!(!filter.matches(&person(3, "peach", "bros")));
        assert!(!filter.matches(&person(4, "mario", "kart")));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(Filter::new().matches(&person(1, "a", "b")));
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = Filter::new().equals("b", 1).any_of("a", [3, 2]);
        let b = Filter::new().any_of("a", [2, 3]).equals("b", 1);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "a:2,3;b:1");
    }

    #[test]
    fn test_deserialize_scalar_or_list() {
        let filter: Filter = serde_json::from_str(r#"{"first": ["a", "b"], "last": "c"}"#).unwrap();
        assert_eq!(filter.values("first").unwrap().len(), 2);
        assert_eq!(filter.values("last").unwrap(), &[Value::from("c")]);
    }

    #[test]
    fn test_by_keys() {
        let filter = Filter::by_keys(&["id".to_string()], &[RecordKey::from(3), RecordKey::from(1)]);
        assert_eq!(filter.values("id").unwrap(), &[Value::from(1), Value::from(3)]);
    }
}
