//! Event plumbing
//!
//! Resource-level notifications (`new-<res>`, `deleted-<res>-pk`, ...) go
//! through the resource manager's bus; every window also owns a bus for its
//! `loading` / `paging` / `records` / `error` / `refresh` events.

pub mod bus;
pub mod messages;

pub use bus::{EventBus, EventStream, DEFAULT_CAPACITY};
pub use messages::{deleted_topic, new_topic, page_topic, Event, Payload};
