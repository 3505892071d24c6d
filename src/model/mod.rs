//! Relcache data model
//!
//! - **value**: `Value` field scalars and composed `RecordKey`s
//! - **record**: materialized `Record`s with live and synced values
//! - **description**: schema-driven `ResourceDescription`
//! - **filter**: AND-of-OR `Filter`s
//! - **sort**: `SortSpec` and compiled `Comparator`s
//! - **paging**: window `Paging`, remote `OuterPaging`, `PagePos`

pub mod description;
pub mod filter;
pub mod paging;
pub mod record;
pub mod sort;
pub mod value;

pub use description::{FieldDescription, FieldKind, Reference, ResourceDescription};
pub use filter::Filter;
pub use paging::{page_count, OuterPaging, PagePos, Paging};
pub use record::{row, FieldChange, Record, Row};
pub use sort::{Comparator, Direction, SortKey, SortParseError, SortSpec};
pub use value::{RecordKey, Value};
