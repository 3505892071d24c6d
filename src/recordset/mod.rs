//! Record windows
//!
//! A `RecordSet` is one paginated view over a resource: a filter, a paging
//! state and the records of the current page. Pages come from the shared
//! sorted caches of the `ResourceManager`; the window itself only keeps the
//! last published slice.

pub mod window;

pub use window::RecordSet;

use crate::model::{Filter, Paging, Record};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Called with every page a window publishes
pub type PageCallback = Arc<dyn Fn(&PageResult) + Send + Sync>;

/// One published window page
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub window: String,
    pub resource: String,
    pub records: Vec<Record>,
    pub total_count: usize,
    pub paging: Paging,
    pub loaded_at: DateTime<Utc>,
}

/// How a window starts out
#[derive(Clone, Default)]
pub struct WindowOptions {
    pub filter: Filter,
    /// Falls back to the manager's configured defaults
    pub paging: Option<Paging>,
    /// Falls back to a random uuid
    pub name: Option<String>,
    pub callback: Option<PageCallback>,
}

impl WindowOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn paging(mut self, paging: Paging) -> Self {
        self.paging = Some(paging);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn on_page<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PageResult) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for WindowOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowOptions")
            .field("filter", &self.filter)
            .field("paging", &self.paging)
            .field("name", &self.name)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
