//! Sorted page cache
//!
//! Answers "rows `from..to` of the filtered, sorted result" with as few
//! remote queries as possible, and keeps the cached answer valid while the
//! server inserts and deletes.
//!
//! ```text
//!   RecordSet ──► Sorted (memoized in PageStore) ──► PageMap
//!                   │                                  pages: outer page → [pk]
//!                   │                                  incomplete, pending, total
//!                   ▼
//!               PageSource ──► query_page / resolve
//! ```
//!
//! A `Sorted` is shared by every window on the same (resource, filter, sort),
//! so reconciliation done through one window is seen by all of them. The
//! source is passed per call; the store never owns it.

pub mod map;
pub mod placement;
pub mod sorted;
pub mod store;

pub use map::{PageMap, StoreOutcome};
pub use placement::PendingInsertion;
pub use sorted::{PageSlice, Sorted};
pub use store::PageStore;

use crate::collection::Collection;
use crate::events::EventBus;
use crate::model::{Filter, OuterPaging, Record, RecordKey, SortSpec};
use crate::remote::QueryPage;
use crate::resources::ResourceResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Where a page cache gets its keys and records from
#[async_trait]
pub trait PageSource: Send + Sync {
    /// One outer page of primary keys
    async fn query_page(
        &self,
        resource: &str,
        filter: &Filter,
        paging: &OuterPaging,
    ) -> ResourceResult<QueryPage>;

    /// Materialize `keys`, in order; unknown keys yield no entry
    async fn resolve(&self, resource: &str, keys: &[RecordKey]) -> ResourceResult<Vec<Record>>;
}

/// Identity of a page map: (resource, filter, sort)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PagerKey {
    pub resource: String,
    pub filter: String,
    pub sort: String,
}

impl PagerKey {
    pub fn new(resource: &str, filter: &Filter, sort: &SortSpec) -> Self {
        Self {
            resource: resource.to_string(),
            filter: filter.cache_key(),
            sort: sort.cache_key(),
        }
    }
}

impl std::fmt::Display for PagerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]({})", self.resource, self.filter, self.sort)
    }
}

/// Collaborators a `Sorted` is built with
#[derive(Clone)]
pub struct PagerContext {
    pub collection: Arc<RwLock<Collection>>,
    pub events: EventBus,
    /// One in-flight page query per resource
    pub gate: Arc<Mutex<()>>,
}
