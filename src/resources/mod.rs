//! Resource layer
//!
//! `ResourceManager` is the single owner of collections and page caches.
//! It resolves descriptions, ingests server payloads, answers record and
//! filter lookups and runs the autolinker.

pub mod autolinker;
pub mod error;
pub mod manager;
pub mod reducer;

pub use error::{ResourceError, ResourceResult};
pub use manager::{ApplyStats, ResourceManager};
pub use reducer::FilterReducer;
