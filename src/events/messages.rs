//! Event payloads
//!
//! Every event carries a string topic (`new-item`, `deleted-item-pk`,
//! `recordset-page-<window>`, ...) and a typed payload.

use crate::model::{Paging, Record, RecordKey, ResourceDescription};
use crate::recordset::PageResult;
use serde::Serialize;

/// Typed event body
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A window published a page
    RecordsetPage(PageResult),
    /// A window started or finished loading
    Loading { loading: bool },
    /// Paging state of a window after a load
    Paging { paging: Paging, total_count: usize },
    /// Visible records of a window after a load
    Records { records: Vec<Record> },
    /// A load failed
    Error { message: String },
    /// A window dropped deleted keys and reloaded
    Refresh,
    /// Keys removed on the server
    Deleted { resource: String, keys: Vec<RecordKey> },
    /// Records created on the server
    New { resource: String, records: Vec<Record> },
    /// Records whose values changed
    Updated { resource: String, records: Vec<Record> },
    /// Records ingested from any payload
    Received { resource: String, records: Vec<Record> },
    /// Two neighboring outer pages disagree at their boundary
    Inconsistency {
        resource: String,
        page: usize,
        expected: Option<RecordKey>,
        found: Option<RecordKey>,
    },
    /// A resource description became available
    GotModel { description: ResourceDescription },
    /// A server payload was fully applied
    GotData,
}

/// Event routed through an `EventBus`
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: String,
    pub payload: Payload,
}

pub fn deleted_topic(resource: &str) -> String {
    format!("deleted-{}-pk", resource)
}

pub fn new_topic(resource: &str) -> String {
    format!("new-{}", resource)
}

pub fn page_topic(window: &str) -> String {
    format!("recordset-page-{}", window)
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn deleted(resource: &str, keys: Vec<RecordKey>) -> Self {
        Self::new(
            deleted_topic(resource),
            Payload::Deleted {
                resource: resource.to_string(),
                keys,
            },
        )
    }

    pub fn inserted(resource: &str, records: Vec<Record>) -> Self {
        Self::new(
            new_topic(resource),
            Payload::New {
                resource: resource.to_string(),
                records,
            },
        )
    }

    pub fn updated(resource: &str, records: Vec<Record>) -> Self {
        Self::new(
            format!("updated-{}", resource),
            Payload::Updated {
                resource: resource.to_string(),
                records,
            },
        )
    }

    pub fn received(resource: &str, records: Vec<Record>) -> Self {
        Self::new(
            format!("received-{}", resource),
            Payload::Received {
                resource: resource.to_string(),
                records,
            },
        )
    }

    pub fn inconsistency(
        resource: &str,
        page: usize,
        expected: Option<RecordKey>,
        found: Option<RecordKey>,
    ) -> Self {
        Self::new(
            format!("inconsistency-{}", resource),
            Payload::Inconsistency {
                resource: resource.to_string(),
                page,
                expected,
                found,
            },
        )
    }

    pub fn got_model(description: ResourceDescription) -> Self {
        Self::new(
            format!("got-model-{}", description.name),
            Payload::GotModel { description },
        )
    }

    pub fn got_data() -> Self {
        Self::new("got-data", Payload::GotData)
    }

    pub fn page(result: PageResult) -> Self {
        Self::new(page_topic(&result.window), Payload::RecordsetPage(result))
    }

    pub fn loading(loading: bool) -> Self {
        Self::new("loading", Payload::Loading { loading })
    }

    pub fn paging(paging: Paging, total_count: usize) -> Self {
        Self::new("paging", Payload::Paging { paging, total_count })
    }

    pub fn records(records: Vec<Record>) -> Self {
        Self::new("records", Payload::Records { records })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            "error",
            Payload::Error {
                message: message.into(),
            },
        )
    }

    pub fn refresh() -> Self {
        Self::new("refresh", Payload::Refresh)
    }
}
