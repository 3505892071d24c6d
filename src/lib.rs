//! # Relcache
//!
//! Client-side relational record cache. Mirrors a remote resource server
//! into indexed in-memory collections and serves sorted, paginated windows
//! over them with as few remote round-trips as possible.
//!
//! ## Features
//!
//! - **Schema driven**: collections are built from server resource descriptions
//! - **Indexed lookups**: single, multi and many-to-many indexes with gap filling
//! - **Shared page caches**: one sorted page map per (resource, filter, sort)
//! - **Live reconciliation**: server inserts and deletes are placed into cached
//!   pages without re-querying
//!
//! ## Modules
//!
//! - [`model`]: records, keys, descriptions, filters, sort specs, paging
//! - [`collection`]: indexed record store per resource
//! - [`pager`]: sorted page cache service
//! - [`recordset`]: paginated windows
//! - [`resources`]: resource manager and autolinker
//! - [`remote`]: remote server collaborator
//! - [`events`]: notification bus
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relcache::model::{row, ResourceDescription};
//! use relcache::recordset::{RecordSet, WindowOptions};
//! use relcache::remote::MemoryRemote;
//! use relcache::resources::ResourceManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let remote = Arc::new(MemoryRemote::new());
//!     remote.register(ResourceDescription::new("item", 10, &["id"])).await;
//!     remote.insert("item", (1..=25).map(|i| row([("id", i)])).collect()).await?;
//!
//!     let manager = Arc::new(ResourceManager::new(remote.clone()));
//!     let window = RecordSet::open(manager.clone(), "item", WindowOptions::new()).await;
//!
//!     if let Some(page) = window.set_page(3).await {
//!         println!("{} of {} records", page.records.len(), page.total_count);
//!     }
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod config;
pub mod events;
pub mod model;
pub mod pager;
pub mod recordset;
pub mod remote;
pub mod resources;

pub use model::{
    Filter, OuterPaging, Paging, Record, RecordKey, Reference, ResourceDescription, Row, SortSpec,
    Value,
};

pub use collection::{Collection, CollectionIndex, DirtyFlag, FetchTracker, Index, ManyToMany, MultiIndex};

pub use pager::{PageMap, PageSource, PageStore, PagerKey, Sorted};

pub use recordset::{PageResult, RecordSet, WindowOptions};

pub use resources::{ApplyStats, FilterReducer, ResourceError, ResourceManager, ResourceResult};

pub use remote::{MemoryRemote, QueryPage, Remote, RemoteError, RemoteResult, ServerData};

pub use events::{Event, EventBus, EventStream, Payload};

pub use config::{AutolinkerConfig, CacheConfig, Config, ConfigError, LoggingConfig};
