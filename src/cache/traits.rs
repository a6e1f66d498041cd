//! Collaborator traits for the sensor data cache.

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::error::{FetchError, PersistenceError};
use crate::sensors::{CacheKey, Payload};

/// Source of sensor data, usually the HTTP data API.
///
/// Implementors must return the payload variant matching `key.kind()`.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, key: CacheKey) -> BoxFuture<'_, Result<Payload, FetchError>>;
}

/// Durable home for serialized store snapshots.
///
/// Snapshots are opaque strings saved under a slot name. Both operations are
/// best effort from the store's point of view: failures are logged, never
/// propagated.
pub trait SnapshotStorage: Send + Sync {
  /// Load the snapshot saved under `slot`, if any.
  fn load(&self, slot: &str) -> Result<Option<String>, PersistenceError>;

  /// Replace the snapshot saved under `slot`.
  fn save(&self, slot: &str, snapshot: &str) -> Result<(), PersistenceError>;
}

impl<S: SnapshotStorage + ?Sized> SnapshotStorage for Arc<S> {
  fn load(&self, slot: &str) -> Result<Option<String>, PersistenceError> {
    (**self).load(slot)
  }

  fn save(&self, slot: &str, snapshot: &str) -> Result<(), PersistenceError> {
    (**self).save(slot, snapshot)
  }
}
