//! Resource descriptions
//!
//! Schema sent by the server for each resource: fields, primary key,
//! references and the natural page size (`rpp`). Everything downstream is
//! driven from this data; nothing is generated per resource.

use crate::model::record::Record;
use crate::model::value::RecordKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_rpp() -> usize {
    10
}

/// Description of one remote resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub name: String,
    /// Natural (server-side) page size
    #[serde(default = "default_rpp")]
    pub rpp: usize,
    #[serde(alias = "$pk")]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDescription>,
    #[serde(default)]
    pub references: HashMap<String, Reference>,
    #[serde(default)]
    pub verbs: Vec<String>,
}

/// Type of a described field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    BigInteger,
    Float,
    Decimal,
    Boolean,
    #[default]
    String,
    Text,
    Char,
    /// Epoch seconds
    Date,
    /// Epoch seconds
    DateTime,
    Interval,
    Json,
    Array,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub readonly: bool,
}

/// Link from an attribute of this resource to another resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub resource: String,
    /// Attribute on the referenced resource holding the linked key
    #[serde(default = "default_foreign_attribute")]
    pub foreign_attribute: String,
    #[serde(default)]
    pub many_to_many: bool,
}

fn default_foreign_attribute() -> String {
    "id".to_string()
}

impl ResourceDescription {
    pub fn new(name: impl Into<String>, rpp: usize, primary_key: &[&str]) -> Self {
        Self {
            name: name.into(),
            rpp,
            primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
            fields: Vec::new(),
            references: HashMap::new(),
            verbs: Vec::new(),
        }
    }

    /// Builder method: add a field
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescription {
            name: name.into(),
            kind,
            readonly: false,
        });
        self
    }

    /// Builder method: add a reference
    pub fn reference(mut self, attribute: impl Into<String>, reference: Reference) -> Self {
        self.references.insert(attribute.into(), reference);
        self
    }

    pub fn key_of(&self, record: &Record) -> RecordKey {
        record.key(&self.primary_key)
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescription> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields a client may write: non-readonly fields plus the primary key
    pub fn writable_fields(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| !f.readonly)
            .map(|f| f.name.as_str())
            .collect();
        for pk in &self.primary_key {
            if !out.contains(&pk.as_str()) {
                out.push(pk);
            }
        }
        out
    }

    pub fn is_primary_key(&self, field: &str) -> bool {
        self.primary_key.iter().any(|f| f == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_server_description() {
        let json = r#"{
            "name": "person",
            "rpp": 20,
            "$pk": ["id"],
            "fields": [
                {"name": "id", "type": "integer", "readonly": true},
                {"name": "born", "type": "datetime"},
                {"name": "blob", "type": "geometry"}
            ],
            "references": {
                "tags": {"resource": "tag", "foreign_attribute": "id", "many_to_many": true}
            }
        }"#;
        let desc: ResourceDescription = serde_json::from_str(json).unwrap();

        assert_eq!(desc.rpp, 20);
        assert_eq!(desc.primary_key, vec!["id"]);
        assert_eq!(desc.get_field("born").unwrap().kind, FieldKind::DateTime);
        assert_eq!(desc.get_field("blob").unwrap().kind, FieldKind::Other);
        assert!(desc.references["tags"].many_to_many);
    }

    #[test]
    fn test_writable_fields_include_primary_key() {
        let mut desc = ResourceDescription::new("item", 10, &["id"]).field("name", FieldKind::String);
        desc.fields.push(FieldDescription {
            name: "id".into(),
            kind: FieldKind::Integer,
            readonly: true,
        });
        assert_eq!(desc.writable_fields(), vec!["name", "id"]);
    }
}
