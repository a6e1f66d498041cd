//! Test doubles for the cache collaborators.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::{Fetcher, SnapshotStorage};
use crate::error::{FetchError, PersistenceError};
use crate::sensors::{CacheKey, LiveReading, Payload};

pub fn live_payload(value: f64) -> Payload {
  Payload::Live(vec![LiveReading {
    point_slice_id: 8935,
    alias: "RM 325".to_string(),
    utc_date_time: "2021-10-01T12:00:00.000Z".to_string(),
    et_date_time: "2021-10-01T08:00:00.000Z".to_string(),
    actual_value: value,
  }])
}

/// Snapshot storage backed by a map, counting saves.
#[derive(Default)]
pub struct MemoryStorage {
  slots: Mutex<HashMap<String, String>>,
  saves: AtomicUsize,
}

impl MemoryStorage {
  pub fn insert(&self, slot: &str, snapshot: &str) {
    self
      .slots
      .lock()
      .unwrap()
      .insert(slot.to_string(), snapshot.to_string());
  }

  pub fn get(&self, slot: &str) -> Option<String> {
    self.slots.lock().unwrap().get(slot).cloned()
  }

  pub fn save_count(&self) -> usize {
    self.saves.load(Ordering::SeqCst)
  }
}

impl SnapshotStorage for MemoryStorage {
  fn load(&self, slot: &str) -> Result<Option<String>, PersistenceError> {
    Ok(self.get(slot))
  }

  fn save(&self, slot: &str, snapshot: &str) -> Result<(), PersistenceError> {
    self.saves.fetch_add(1, Ordering::SeqCst);
    self.insert(slot, snapshot);
    Ok(())
  }
}

/// Snapshot storage whose every operation fails.
pub struct FailingStorage;

impl SnapshotStorage for FailingStorage {
  fn load(&self, _slot: &str) -> Result<Option<String>, PersistenceError> {
    Err(PersistenceError::LockPoisoned)
  }

  fn save(&self, _slot: &str, _snapshot: &str) -> Result<(), PersistenceError> {
    Err(PersistenceError::NoDataDir)
  }
}

/// Fetcher answering every request the same way after an optional delay,
/// counting invocations.
pub struct StubFetcher {
  outcome: Result<Payload, String>,
  delay: Duration,
  calls: AtomicUsize,
}

impl StubFetcher {
  pub fn ok(payload: Payload) -> Self {
    Self {
      outcome: Ok(payload),
      delay: Duration::ZERO,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn err(message: &str) -> Self {
    Self {
      outcome: Err(message.to_string()),
      delay: Duration::ZERO,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for StubFetcher {
  fn fetch(&self, _key: CacheKey) -> BoxFuture<'_, Result<Payload, FetchError>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    async move {
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }
      self.outcome.clone().map_err(FetchError::Api)
    }
    .boxed()
  }
}

/// Fetcher whose fetches panic, counting invocations.
#[derive(Default)]
pub struct PanickingFetcher {
  calls: AtomicUsize,
}

impl PanickingFetcher {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

async fn explode() -> Result<Payload, FetchError> {
  panic!("fetcher bug")
}

impl Fetcher for PanickingFetcher {
  fn fetch(&self, _key: CacheKey) -> BoxFuture<'_, Result<Payload, FetchError>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    explode().boxed()
  }
}
