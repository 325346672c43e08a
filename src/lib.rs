//! Floodcontrol - Per-Identity Request Rate Limiting
//!
//! This crate decides, for each request tagged with a caller identity, whether
//! the caller has exceeded its allowed number of calls within a rolling window.
//! State lives in a TTL-capable key-value store (Redis in production), one
//! record per identity, so idle callers are cleaned up by the store itself.

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod floodcontrol;
pub mod store;
