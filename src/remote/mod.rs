//! Remote resource server collaborator
//!
//! The cache never talks to a transport directly; it goes through the
//! `Remote` trait. `MemoryRemote` is an in-process server used by the demo
//! binary and the tests.

pub mod error;
pub mod memory;
pub mod payload;

pub use error::{RemoteError, RemoteResult};
pub use memory::MemoryRemote;
pub use payload::{LinkChanges, QueryPage, ServerData};

use crate::model::{Filter, OuterPaging, ResourceDescription, Value};
use async_trait::async_trait;

/// Resource server as seen by the cache
#[async_trait]
pub trait Remote: Send + Sync {
    /// Schema of one resource
    async fn describe(&self, resource: &str) -> RemoteResult<ResourceDescription>;

    /// One outer page of primary keys for `filter`, sorted by `paging.sort`
    ///
    /// Side-effect free; the cache relies on being able to repeat it.
    async fn query(
        &self,
        resource: &str,
        filter: &Filter,
        paging: &OuterPaging,
    ) -> RemoteResult<QueryPage>;

    /// Rows matching `filter`, answered in the `results` section
    async fn fetch(&self, resource: &str, filter: &Filter) -> RemoteResult<ServerData>;

    /// Many-to-many links of `keys` through `attribute`
    async fn m2m(&self, resource: &str, attribute: &str, keys: &[Value]) -> RemoteResult<ServerData>;
}
