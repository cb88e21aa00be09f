//! marea-core
//!
//! Traits and utilities shared across the marea ecosystem.
//!
//! - `connector`: the `MareaConnector` trait and capability feed traits.
//! - `cache`: the shared key-value cache abstraction with TTL and pub/sub.
//! - `store`: durable store abstractions for bars, the symbol universe, and FX rates.
//! - `calendar`: trading calendars and per-market clocks.
#![warn(missing_docs)]

/// Trading calendars, market hours, and the multi-market clock.
pub mod calendar;
/// Connector capability traits and the primary `MareaConnector` interface.
pub mod connector;

mod cache;
mod store;
mod stream;

pub use cache::SharedCache;
pub use connector::{AdapterStatus, AdapterStatusSnapshot, MareaConnector};
pub use marea_types::MareaError;
pub use store::{BarStore, FxStore, RateSource, UniverseStore};
pub use stream::StreamHandle;
