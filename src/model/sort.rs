//! Sort specifications and comparators
//!
//! A sort spec is an ordered list of `(field, direction)` pairs written as
//! `"field"` or `"field desc"`. It compiles into a `Comparator`: one closure
//! per key, evaluated in order with early exit. Nulls sort last in both
//! directions.

use crate::model::record::Record;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Error, PartialEq)]
pub enum SortParseError {
    #[error("Empty sort key")]
    Empty,

    #[error("Invalid sort direction in {0:?} (expected asc or desc)")]
    Direction(String),
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

impl FromStr for SortKey {
    type Err = SortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let field = parts.next().ok_or(SortParseError::Empty)?;
        let direction = match parts.next().map(|d| d.to_ascii_lowercase()) {
            None => Direction::Asc,
            Some(d) if d == "asc" => Direction::Asc,
            Some(d) if d == "desc" => Direction::Desc,
            Some(_) => return Err(SortParseError::Direction(s.to_string())),
        };
        if parts.next().is_some() {
            return Err(SortParseError::Direction(s.to_string()));
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "{}", self.field),
            Direction::Desc => write!(f, "{} desc", self.field),
        }
    }
}

/// Ordered list of sort keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SortSpec(Vec<SortKey>);

impl TryFrom<Vec<String>> for SortSpec {
    type Error = SortParseError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        value
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>, _>>()
            .map(SortSpec)
    }
}

impl From<SortSpec> for Vec<String> {
    fn from(spec: SortSpec) -> Self {
        spec.0.iter().map(|k| k.to_string()).collect()
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        SortSpec(vec![SortKey::asc("id")])
    }
}

impl SortSpec {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self(keys)
    }

    /// Parse `["name", "age desc"]`
    pub fn parse(keys: &[&str]) -> Result<Self, SortParseError> {
        keys.iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>, _>>()
            .map(SortSpec)
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    pub fn cache_key(&self) -> String {
        self.0
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Append primary-key fields not already sorted on, guaranteeing a total order
    pub fn with_tiebreak(&self, primary_key: &[String]) -> SortSpec {
        let mut keys = self.0.clone();
        for field in primary_key {
            if !keys.iter().any(|k| &k.field == field) {
                keys.push(SortKey::asc(field.clone()));
            }
        }
        SortSpec(keys)
    }

    /// Compile into a comparator with the primary key as final tiebreaker
    pub fn comparator(&self, primary_key: &[String]) -> Comparator {
        let steps = self
            .with_tiebreak(primary_key)
            .0
            .into_iter()
            .map(|key| {
                let step: CompareStep = Box::new(move |a: &Record, b: &Record| {
                    compare_field(a, b, &key.field, key.direction)
                });
                step
            })
            .collect();
        Comparator { steps }
    }
}

type CompareStep = Box<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;

fn compare_field(a: &Record, b: &Record, field: &str, direction: Direction) -> Ordering {
    let (va, vb) = (a.get(field), b.get(field));
    if va == vb {
        return Ordering::Equal;
    }
    if va.is_null() {
        return Ordering::Greater;
    }
    if vb.is_null() {
        return Ordering::Less;
    }
    match direction {
        Direction::Asc => va.cmp(vb),
        Direction::Desc => vb.cmp(va),
    }
}

/// Multi-key record comparator
pub struct Comparator {
    steps: Vec<CompareStep>,
}

impl Comparator {
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for step in &self.steps {
            let ord = step(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comparator")
            .field("steps", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::row;
    use crate::model::value::Value;

    fn rec(id: i64, name: Value) -> Record {
        Record::from_row(row([("id", Value::from(id)), ("name", name)]))
    }

    fn pk() -> Vec<String> {
        vec!["id".to_string()]
    }

    #[test]
    fn test_parse_sort_keys() {
        let spec = SortSpec::parse(&["name", "age DESC"]).unwrap();
        assert_eq!(spec.keys()[0], SortKey::asc("name"));
        assert_eq!(spec.keys()[1], SortKey::desc("age"));
        assert_eq!(spec.cache_key(), "name,age desc");

        assert_eq!(
            SortSpec::parse(&["name sideways"]),
            Err(SortParseError::Direction("name sideways".into()))
        );
        assert_eq!(SortSpec::parse(&[""]), Err(SortParseError::Empty));
    }

    #[test]
    fn test_tiebreak_appended_once() {
        let spec = SortSpec::parse(&["name"]).unwrap().with_tiebreak(&pk());
        assert_eq!(spec.cache_key(), "name,id");

        let spec = SortSpec::parse(&["id desc"]).unwrap().with_tiebreak(&pk());
        assert_eq!(spec.cache_key(), "id desc");
    }

    #[test]
    fn test_comparator_directions_and_tiebreak() {
        let cmp = SortSpec::parse(&["name desc"]).unwrap().comparator(&pk());

        let a = rec(1, "a".into());
        let b = rec(2, "b".into());
        let b2 = rec(3, "b".into());

        assert_eq!(cmp.compare(&b, &a), Ordering::Less);
        assert_eq!(cmp.compare(&b, &b2), Ordering::Less);
        assert_eq!(cmp.compare(&b2, &b2), Ordering::Equal);
    }

    #[test]
    fn test_nulls_sort_last() {
        let asc = SortSpec::parse(&["name"]).unwrap().comparator(&pk());
        let desc = SortSpec::parse(&["name desc"]).unwrap().comparator(&pk());
        let null = rec(1, Value::Null);
        let some = rec(2, "z".into());

        assert_eq!(asc.compare(&null, &some), Ordering::Greater);
        assert_eq!(desc.compare(&null, &some), Ordering::Greater);
    }

    #[test]
    fn test_serde_as_strings() {
        let spec: SortSpec = serde_json::from_str(r#"["name", "id desc"]"#).unwrap();
        assert_eq!(serde_json::to_string(&spec).unwrap(), r#"["name","id desc"]"#);
    }
}
