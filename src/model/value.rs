//! Field values and record keys
//!
//! `Value` is the scalar stored in every record field. It is totally ordered
//! (floats via `total_cmp`) and hashable, so it can key indexes directly.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single field value as sent by the resource server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as epoch seconds (`date` / `datetime` fields)
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = self.as_f64()?;
        let whole = secs.trunc() as i64;
        let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
        Utc.timestamp_opt(whole, nanos).single()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            // Mixed numerics compare numerically, ints first on a tie
            (Value::Int(a), Value::Float(b)) => {
                (*a as f64).total_cmp(b).then(Ordering::Less)
            }
            (Value::Float(a), Value::Int(b)) => {
                a.total_cmp(&(*b as f64)).then(Ordering::Greater)
            }
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                1u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Primary key of a record: the values of every primary-key field, in order
///
/// Serialized as the bare value for single-field keys and as an array for
/// composite keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "KeyRepr", into = "KeyRepr")]
pub struct RecordKey(Vec<Value>);

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum KeyRepr {
    Composite(Vec<Value>),
    Single(Value),
}

impl From<KeyRepr> for RecordKey {
    fn from(repr: KeyRepr) -> Self {
        match repr {
            KeyRepr::Composite(values) => RecordKey(values),
            KeyRepr::Single(value) => RecordKey(vec![value]),
        }
    }
}

impl From<RecordKey> for KeyRepr {
    fn from(key: RecordKey) -> Self {
        let mut values = key.0;
        if values.len() == 1 {
            KeyRepr::Single(values.remove(0))
        } else {
            KeyRepr::Composite(values)
        }
    }
}

impl RecordKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// First component; the only one for single-field keys
    pub fn head(&self) -> &Value {
        self.0.first().unwrap_or(&Value::Null)
    }

    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "-")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

macro_rules! single_key_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for RecordKey {
                fn from(v: $t) -> Self {
                    RecordKey(vec![Value::from(v)])
                }
            }
        )*
    };
}

single_key_from!(i64, i32, u32, usize, bool, &str, String);

impl From<Value> for RecordKey {
    fn from(v: Value) -> Self {
        RecordKey(vec![v])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_value_ordering() {
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Int(2) < Value::Float(2.5));
        assert!(Value::Float(1.5) < Value::Int(2));
        assert!(Value::Int(100) < Value::Text("a".into()));
        assert!(Value::from("abc") < Value::from("abd"));
    }

    #[test]
    fn test_value_deserialize_untagged() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(3),
                Value::Float(2.5),
                Value::Text("x".into())
            ]
        );
    }

    #[test]
    fn test_value_as_datetime() {
        let dt = Value::Int(86_400).as_datetime().unwrap();
        assert_eq!(dt.timestamp(), 86_400);
        assert!(Value::from("nope").as_datetime().is_none());
    }

    #[test]
    fn test_record_key_serde() {
        let single: RecordKey = serde_json::from_str("7").unwrap();
        assert_eq!(single, RecordKey::from(7));
        assert_eq!(serde_json::to_string(&single).unwrap(), "7");

        let composite: RecordKey = serde_json::from_str(r#"[1, "a"]"#).unwrap();
        assert!(composite.is_composite());
        assert_eq!(composite.to_string(), "1-a");
        assert_eq!(serde_json::to_string(&composite).unwrap(), r#"[1,"a"]"#);
    }

    #[test]
    fn test_keys_hash_consistently() {
        let mut set = HashSet::new();
        set.insert(RecordKey::from(1));
        set.insert(RecordKey::from(1));
        set.insert(RecordKey::from("1"));
        assert_eq!(set.len(), 2);
    }
}
