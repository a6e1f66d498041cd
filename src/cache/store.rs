//! In-memory cache store with snapshot persistence and change notification.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::traits::SnapshotStorage;
use crate::error::PersistenceError;
use crate::sensors::{Building, CacheKey, Metric, Payload, PointId};

/// Slot name the whole store is persisted under.
pub const SNAPSHOT_SLOT: &str = "data";

/// Capacity of the change notification channel.
const EVENT_CAPACITY: usize = 256;

/// One cache entry.
///
/// A loaded entry is never loading: starting a fetch replaces the entry with
/// an unloaded one, dropping the previous payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Entry {
  Unloaded {
    loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  Loaded {
    fetched: DateTime<Utc>,
    data: Payload,
  },
}

impl Default for Entry {
  fn default() -> Self {
    Entry::Unloaded {
      loading: false,
      error: None,
    }
  }
}

impl Entry {
  /// Marker written when a fetch begins.
  pub fn loading() -> Self {
    Entry::Unloaded {
      loading: true,
      error: None,
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Entry::Unloaded {
      loading: false,
      error: Some(error.into()),
    }
  }

  /// Freshly fetched data, stamped with the current time.
  pub fn loaded(data: Payload) -> Self {
    Entry::Loaded {
      fetched: Utc::now(),
      data,
    }
  }

  pub fn is_loaded(&self) -> bool {
    matches!(self, Entry::Loaded { .. })
  }

  pub fn is_loading(&self) -> bool {
    matches!(self, Entry::Unloaded { loading: true, .. })
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      Entry::Unloaded { error, .. } => error.as_deref(),
      Entry::Loaded { .. } => None,
    }
  }

  pub fn data(&self) -> Option<&Payload> {
    match self {
      Entry::Loaded { data, .. } => Some(data),
      Entry::Unloaded { .. } => None,
    }
  }

  pub fn fetched(&self) -> Option<DateTime<Utc>> {
    match self {
      Entry::Loaded { fetched, .. } => Some(*fetched),
      Entry::Unloaded { .. } => None,
    }
  }

  /// Whether the entry holds data fetched less than `max_age` before `now`.
  pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
    match self {
      Entry::Loaded { fetched, .. } => now - *fetched < max_age,
      Entry::Unloaded { .. } => false,
    }
  }
}

type Slots = BTreeMap<Building, BTreeMap<Metric, Entry>>;
type PointSlots = BTreeMap<Building, BTreeMap<Metric, BTreeMap<PointId, Entry>>>;

/// Complete store contents, and the shape of a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
  #[serde(default)]
  live: Slots,
  #[serde(default)]
  hist: PointSlots,
  #[serde(rename = "XREF", default)]
  xref: Slots,
  #[serde(rename = "PXREF", default)]
  pxref: Slots,
}

impl Default for StoreState {
  /// Every fixed slot unloaded, no historical series yet.
  fn default() -> Self {
    let mut state = StoreState {
      live: Slots::new(),
      hist: PointSlots::new(),
      xref: Slots::new(),
      pxref: Slots::new(),
    };
    for key in CacheKey::fixed_slots() {
      state.set(key, Entry::default());
    }
    for building in Building::ALL {
      let metrics = state.hist.entry(building).or_default();
      for metric in Metric::ALL {
        metrics.entry(metric).or_default();
      }
    }
    state
  }
}

impl StoreState {
  pub fn get(&self, key: &CacheKey) -> Option<&Entry> {
    let (building, metric) = (key.building(), key.metric());
    match *key {
      CacheKey::Live { .. } => self.live.get(&building)?.get(&metric),
      CacheKey::Xref { .. } => self.xref.get(&building)?.get(&metric),
      CacheKey::Pxref { .. } => self.pxref.get(&building)?.get(&metric),
      CacheKey::Hist { point, .. } => self.hist.get(&building)?.get(&metric)?.get(&point),
    }
  }

  /// Replace one entry, creating any missing intermediate maps.
  pub fn set(&mut self, key: CacheKey, entry: Entry) {
    let (building, metric) = (key.building(), key.metric());
    let slots = match key {
      CacheKey::Live { .. } => &mut self.live,
      CacheKey::Xref { .. } => &mut self.xref,
      CacheKey::Pxref { .. } => &mut self.pxref,
      CacheKey::Hist { point, .. } => {
        self
          .hist
          .entry(building)
          .or_default()
          .entry(metric)
          .or_default()
          .insert(point, entry);
        return;
      }
    };
    slots.entry(building).or_default().insert(metric, entry);
  }

  /// Every key with an entry, historical points included.
  pub fn keys(&self) -> impl Iterator<Item = CacheKey> + '_ {
    let hist = self.hist.iter().flat_map(|(building, metrics)| {
      metrics.iter().flat_map(move |(metric, points)| {
        points.keys().map(move |point| CacheKey::Hist {
          building: *building,
          metric: *metric,
          point: *point,
        })
      })
    });

    slot_keys(&self.live, |building, metric| CacheKey::Live { building, metric })
      .chain(slot_keys(&self.xref, |building, metric| CacheKey::Xref { building, metric }))
      .chain(slot_keys(&self.pxref, |building, metric| CacheKey::Pxref { building, metric }))
      .chain(hist)
  }
}

fn slot_keys(
  slots: &Slots,
  make: fn(Building, Metric) -> CacheKey,
) -> impl Iterator<Item = CacheKey> + '_ {
  slots
    .iter()
    .flat_map(move |(building, metrics)| metrics.keys().map(move |metric| make(*building, *metric)))
}

/// Authoritative cache state.
///
/// Every write replaces a single entry, persists the full snapshot and then
/// notifies subscribers with the written key.
pub struct CacheStore<S: SnapshotStorage> {
  state: Mutex<StoreState>,
  storage: S,
  events: broadcast::Sender<CacheKey>,
}

impl<S: SnapshotStorage> CacheStore<S> {
  /// Create a store in the default state, ignoring anything persisted.
  pub fn new(storage: S) -> Self {
    Self::with_state(storage, StoreState::default())
  }

  /// Create a store from the persisted snapshot, if there is a readable one.
  ///
  /// Missing or unreadable snapshots start the store in the default state.
  pub fn hydrate(storage: S) -> Self {
    let state = match load_snapshot(&storage) {
      Ok(Some(state)) => {
        debug!("Hydrated cache from snapshot");
        state
      }
      Ok(None) => StoreState::default(),
      Err(e) => {
        warn!(error = %e, "Discarding unreadable cache snapshot");
        StoreState::default()
      }
    };
    Self::with_state(storage, state)
  }

  fn with_state(storage: S, state: StoreState) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      state: Mutex::new(state),
      storage,
      events,
    }
  }

  fn lock(&self) -> MutexGuard<'_, StoreState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Current entry for `key`; unmaterialized history reads as unloaded.
  pub fn read(&self, key: &CacheKey) -> Entry {
    self.lock().get(key).cloned().unwrap_or_default()
  }

  pub fn is_loading(&self, key: &CacheKey) -> bool {
    self.lock().get(key).is_some_and(Entry::is_loading)
  }

  /// Whether `key` holds data younger than `max_age`, checked in place.
  pub fn is_fresh(&self, key: &CacheKey, max_age: Duration, now: DateTime<Utc>) -> bool {
    self.lock().get(key).is_some_and(|entry| entry.is_fresh(max_age, now))
  }

  /// Replace the entry for `key`, leaving every other entry untouched.
  pub fn write(&self, key: &CacheKey, entry: Entry) {
    {
      let mut state = self.lock();
      state.set(*key, entry);
      self.persist(&state);
    }
    // Only fails without subscribers
    let _ = self.events.send(*key);
  }

  /// Restore the default state, notifying every key that had an entry.
  pub fn reset(&self) {
    let keys = {
      let mut state = self.lock();
      let keys: Vec<CacheKey> = state.keys().collect();
      *state = StoreState::default();
      self.persist(&state);
      keys
    };
    info!(entries = keys.len(), "Cache reset");
    for key in keys {
      let _ = self.events.send(key);
    }
  }

  pub fn snapshot(&self) -> StoreState {
    self.lock().clone()
  }

  /// Receive the key of every entry written from now on.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
    self.events.subscribe()
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  fn persist(&self, state: &StoreState) {
    let result = serde_json::to_string(state)
      .map_err(PersistenceError::from)
      .and_then(|snapshot| self.storage.save(SNAPSHOT_SLOT, &snapshot));

    if let Err(e) = result {
      warn!(error = %e, "Failed to persist cache snapshot");
    }
  }
}

fn load_snapshot<S: SnapshotStorage>(storage: &S) -> Result<Option<StoreState>, PersistenceError> {
  match storage.load(SNAPSHOT_SLOT)? {
    Some(snapshot) => Ok(Some(serde_json::from_str(&snapshot)?)),
    None => Ok(None),
  }
}
