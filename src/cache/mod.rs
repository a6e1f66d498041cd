//! Sensor data cache.
//!
//! This module provides the client-side cache for the data API:
//! - A store of one entry per resource key, persisted as a single snapshot
//! - Staleness-aware fetching with at most one fetch in flight per key
//! - Change notification for every entry written

mod layer;
mod storage;
mod store;
mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use layer::DataCache;
pub use storage::{NoopStorage, SqliteStorage};
pub use store::{CacheStore, Entry, StoreState, SNAPSHOT_SLOT};
pub use traits::{Fetcher, SnapshotStorage};
