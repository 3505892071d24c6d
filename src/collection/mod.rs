//! Collections and their indexes
//!
//! One `Collection` per resource, holding every materialized record once.
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │          Collection          │
//!                 │  records: RecordId → Record  │
//!                 └──────────────┬───────────────┘
//!          ┌─────────────────────┼─────────────────────┐
//!          ▼                     ▼                     ▼
//!    ┌──────────┐         ┌────────────┐        ┌────────────┐
//!    │  Index   │         │ MultiIndex │        │ ManyToMany │
//!    │ key → id │         │ val → [id] │        │ key → {key}│
//!    └──────────┘         └────────────┘        └────────────┘
//! ```
//!
//! Lookups that miss are handed to a `FetchTracker`; the `DirtyFlag` wakes the
//! autolinker which turns them into remote fetches.

pub mod index;
pub mod many_to_many;
pub mod multi_index;
pub mod store;
pub mod tracker;

pub use index::Index;
pub use many_to_many::ManyToMany;
pub use multi_index::MultiIndex;
pub use store::{BulkInsert, Collection, CollectionIndex, CollectionStats, IndexKind, MissingFilter};
pub use tracker::{DirtyFlag, FetchTracker};

use serde::Serialize;

/// Stable handle of a record inside its collection
///
/// Ids grow monotonically, so ordering by id is insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordId(pub u64);
