//! Fetch coordinator that decides between cached entries and network fetches.

use chrono::{Duration, Utc};
use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use super::store::{CacheStore, Entry};
use super::traits::{Fetcher, SnapshotStorage};
use crate::error::{FetchError, ValidationError};
use crate::sensors::{CacheKey, Parameters, ResourceKind};

/// Completion signal of a running fetch, shared by everyone waiting on it.
type InFlight = Shared<oneshot::Receiver<()>>;
type InFlightMap = Arc<Mutex<HashMap<CacheKey, InFlight>>>;

/// Error recorded for a fetch task that ended without an outcome.
const ABORTED: &str = "fetch aborted";

/// Cache layer in front of a [`Fetcher`].
///
/// Keeps at most one fetch running per key: callers arriving while a fetch
/// is in flight wait for that fetch instead of starting their own. Fetch
/// outcomes are recorded in the store and never returned as errors.
pub struct DataCache<F: Fetcher, S: SnapshotStorage> {
  store: Arc<CacheStore<S>>,
  fetcher: Arc<F>,
  in_flight: InFlightMap,
  /// Upper bound on a single fetch
  fetch_timeout: std::time::Duration,
}

impl<F: Fetcher, S: SnapshotStorage + 'static> DataCache<F, S> {
  pub fn new(store: CacheStore<S>, fetcher: F) -> Self {
    Self {
      store: Arc::new(store),
      fetcher: Arc::new(fetcher),
      in_flight: Arc::default(),
      fetch_timeout: std::time::Duration::from_secs(30),
    }
  }

  /// Set the time after which a fetch is abandoned and recorded as failed.
  pub fn with_fetch_timeout(mut self, timeout: std::time::Duration) -> Self {
    self.fetch_timeout = timeout;
    self
  }

  pub fn store(&self) -> &CacheStore<S> {
    &self.store
  }

  #[cfg(test)]
  pub fn fetcher(&self) -> &F {
    &self.fetcher
  }

  /// Make sure the entry for `kind`/`parameters` holds data younger than
  /// `max_age`, fetching it otherwise.
  ///
  /// Malformed parameters fail before the store or the network is touched.
  /// Everything after that is reported through the entry.
  pub async fn ensure_data(
    &self,
    kind: ResourceKind,
    parameters: &Parameters,
    max_age: Duration,
  ) -> Result<(), ValidationError> {
    let key = CacheKey::resolve(kind, parameters)?;
    self.ensure(key, max_age).await;
    Ok(())
  }

  /// Current entry for `kind`/`parameters`.
  pub fn read_data(
    &self,
    kind: ResourceKind,
    parameters: &Parameters,
  ) -> Result<Entry, ValidationError> {
    let key = CacheKey::resolve(kind, parameters)?;
    Ok(self.store.read(&key))
  }

  pub fn is_loading_data(
    &self,
    kind: ResourceKind,
    parameters: &Parameters,
  ) -> Result<bool, ValidationError> {
    let key = CacheKey::resolve(kind, parameters)?;
    Ok(self.store.is_loading(&key))
  }

  pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
    self.store.subscribe()
  }

  /// [`ensure_data`](Self::ensure_data) for an already resolved key.
  ///
  /// The fetch runs as its own task, so dropping the returned future does
  /// not cancel it.
  pub async fn ensure(&self, key: CacheKey, max_age: Duration) {
    if self.store.is_fresh(&key, max_age, Utc::now()) {
      trace!(%key, "Cache hit");
      return;
    }

    let pending = {
      let mut in_flight = lock(&self.in_flight);
      match in_flight.get(&key) {
        Some(pending) => {
          debug!(%key, "Joining in-flight fetch");
          pending.clone()
        }
        None => {
          // A fetch may have finished since the first check
          if self.store.is_fresh(&key, max_age, Utc::now()) {
            return;
          }

          self.store.write(&key, Entry::loading());
          let pending = self.spawn_fetch(key);
          in_flight.insert(key, pending.clone());
          pending
        }
      }
    };

    // Never cancelled: the guard always signals
    let _ = pending.await;
  }

  /// Fetch `key` whatever the age of its entry, joining a fetch already in
  /// flight.
  pub async fn refresh(&self, key: CacheKey) {
    self.ensure(key, Duration::zero()).await;
  }

  /// Start fetching `key` in the background.
  ///
  /// Callers must hold the in-flight lock and register the returned channel
  /// before releasing it.
  fn spawn_fetch(&self, key: CacheKey) -> InFlight {
    let (sender, receiver) = oneshot::channel();

    let fetcher = Arc::clone(&self.fetcher);
    let timeout = self.fetch_timeout;
    let mut done = InFlightGuard {
      store: Arc::clone(&self.store),
      in_flight: Arc::clone(&self.in_flight),
      key,
      sender: Some(sender),
      completed: false,
    };

    debug!(%key, "Fetching");
    tokio::spawn(async move {
      let result = match tokio::time::timeout(timeout, fetcher.fetch(key)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
      };

      let entry = match result {
        Ok(data) => {
          debug!(%key, records = data.record_count(), "Fetched");
          Entry::loaded(data)
        }
        Err(e) => {
          warn!(%key, error = %e, "Fetch failed");
          Entry::failed(e.to_string())
        }
      };

      done.store.write(&key, entry);
      done.completed = true;
    });

    receiver.shared()
  }
}

impl<F: Fetcher, S: SnapshotStorage> Clone for DataCache<F, S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      fetcher: Arc::clone(&self.fetcher),
      in_flight: Arc::clone(&self.in_flight),
      fetch_timeout: self.fetch_timeout,
    }
  }
}

/// Ends a fetch task: records an aborted fetch as failed, deregisters the
/// key and wakes waiters, in that order.
///
/// Runs on every exit from the task, including a panicking fetcher.
struct InFlightGuard<S: SnapshotStorage> {
  store: Arc<CacheStore<S>>,
  in_flight: InFlightMap,
  key: CacheKey,
  sender: Option<oneshot::Sender<()>>,
  completed: bool,
}

impl<S: SnapshotStorage> Drop for InFlightGuard<S> {
  fn drop(&mut self) {
    if !self.completed {
      warn!(key = %self.key, "Fetch aborted");
      self.store.write(&self.key, Entry::failed(ABORTED));
    }
    lock(&self.in_flight).remove(&self.key);
    if let Some(sender) = self.sender.take() {
      sender.send(()).ok();
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testutil::{live_payload, MemoryStorage, PanickingFetcher, StubFetcher};
  use crate::event::{Event, EventHandler};
  use crate::sensors::{Building, Metric, Payload, RoomXref};
  use std::time::Duration as StdDuration;

  fn watt_temp() -> Parameters {
    Parameters::new("WATT", "TEMP")
  }

  fn cache(fetcher: StubFetcher) -> DataCache<StubFetcher, Arc<MemoryStorage>> {
    DataCache::new(CacheStore::new(Arc::new(MemoryStorage::default())), fetcher)
  }

  fn live_key() -> CacheKey {
    CacheKey::Live {
      building: Building::Watt,
      metric: Metric::Temp,
    }
  }

  #[tokio::test]
  async fn test_fetch_populates_entry() {
    let cache = cache(StubFetcher::ok(live_payload(72.5)));

    cache
      .ensure_data(ResourceKind::Live, &watt_temp(), Duration::minutes(1))
      .await
      .unwrap();

    let entry = cache.read_data(ResourceKind::Live, &watt_temp()).unwrap();
    assert_eq!(entry.data(), Some(&live_payload(72.5)));
    assert!(!cache.is_loading_data(ResourceKind::Live, &watt_temp()).unwrap());
  }

  #[tokio::test]
  async fn test_fresh_entry_is_not_refetched() {
    let cache = cache(StubFetcher::ok(live_payload(72.5)));

    for _ in 0..2 {
      cache
        .ensure_data(ResourceKind::Live, &watt_temp(), Duration::minutes(1))
        .await
        .unwrap();
    }

    assert_eq!(cache.fetcher().calls(), 1);
  }

  #[tokio::test]
  async fn test_stale_entry_is_refetched() {
    let cache = cache(StubFetcher::ok(live_payload(72.5)));
    let max_age = Duration::seconds(60);
    let fetched = Utc::now() - max_age - Duration::seconds(1);
    cache.store().write(
      &live_key(),
      Entry::Loaded {
        fetched,
        data: live_payload(60.0),
      },
    );

    cache.ensure(live_key(), max_age).await;

    assert_eq!(cache.fetcher().calls(), 1);
    let entry = cache.store().read(&live_key());
    assert_eq!(entry.data(), Some(&live_payload(72.5)));
    assert!(entry.fetched().unwrap() > fetched);
  }

  #[tokio::test]
  async fn test_entry_within_max_age_is_reused() {
    let cache = cache(StubFetcher::ok(live_payload(72.5)));
    let max_age = Duration::seconds(60);
    cache.store().write(
      &live_key(),
      Entry::Loaded {
        fetched: Utc::now() - max_age + Duration::seconds(1),
        data: live_payload(60.0),
      },
    );

    cache.ensure(live_key(), max_age).await;

    assert_eq!(cache.fetcher().calls(), 0);
    assert_eq!(cache.store().read(&live_key()).data(), Some(&live_payload(60.0)));
  }

  #[tokio::test]
  async fn test_invalid_parameters_touch_nothing() {
    let storage = Arc::new(MemoryStorage::default());
    let cache = DataCache::new(
      CacheStore::new(Arc::clone(&storage)),
      StubFetcher::ok(live_payload(72.5)),
    );
    let before = cache.store().snapshot();

    let result = cache
      .ensure_data(
        ResourceKind::Live,
        &Parameters::new("NOPE", "TEMP"),
        Duration::seconds(1),
      )
      .await;

    assert_eq!(result, Err(ValidationError::UnknownBuilding("NOPE".to_string())));
    assert_eq!(cache.fetcher().calls(), 0);
    assert_eq!(storage.save_count(), 0);
    assert_eq!(cache.store().snapshot(), before);
  }

  #[tokio::test]
  async fn test_hist_without_point_is_rejected() {
    let cache = cache(StubFetcher::ok(live_payload(72.5)));
    let result = cache
      .ensure_data(ResourceKind::Hist, &watt_temp(), Duration::seconds(1))
      .await;
    assert_eq!(result, Err(ValidationError::MissingPoint));
    assert_eq!(cache.fetcher().calls(), 0);
  }

  #[tokio::test]
  async fn test_failure_is_recorded_in_entry() {
    let cache = cache(StubFetcher::err("server unreachable"));

    cache
      .ensure_data(ResourceKind::Xref, &watt_temp(), Duration::minutes(1))
      .await
      .unwrap();

    let entry = cache.read_data(ResourceKind::Xref, &watt_temp()).unwrap();
    assert_eq!(
      entry,
      Entry::Unloaded {
        loading: false,
        error: Some("server unreachable".to_string()),
      }
    );
  }

  #[tokio::test]
  async fn test_failed_entry_is_retried() {
    let cache = cache(StubFetcher::err("server unreachable"));

    cache.ensure(live_key(), Duration::minutes(1)).await;
    cache.ensure(live_key(), Duration::minutes(1)).await;

    assert_eq!(cache.fetcher().calls(), 2);
  }

  #[tokio::test]
  async fn test_concurrent_calls_share_one_fetch() {
    let cache = cache(StubFetcher::ok(live_payload(70.0)).with_delay(StdDuration::from_millis(50)));
    let max_age = Duration::minutes(1);
    let parameters = watt_temp();

    tokio::join!(
      cache.ensure_data(ResourceKind::Live, &parameters, max_age),
      cache.ensure_data(ResourceKind::Live, &parameters, max_age),
      cache.ensure(live_key(), max_age),
    );

    assert_eq!(cache.fetcher().calls(), 1);
    assert!(cache.store().read(&live_key()).is_loaded());
  }

  #[tokio::test]
  async fn test_loading_visible_while_fetching() {
    let cache = cache(StubFetcher::ok(live_payload(70.0)).with_delay(StdDuration::from_millis(100)));
    cache.store().write(
      &live_key(),
      Entry::Loaded {
        fetched: Utc::now() - Duration::hours(1),
        data: live_payload(60.0),
      },
    );

    let background = cache.clone();
    let task = tokio::spawn(async move { background.ensure(live_key(), Duration::minutes(1)).await });
    tokio::time::sleep(StdDuration::from_millis(20)).await;

    // Refreshing drops the stale payload
    assert!(cache.is_loading_data(ResourceKind::Live, &watt_temp()).unwrap());
    assert_eq!(cache.store().read(&live_key()).data(), None);

    task.await.unwrap();
    assert!(!cache.store().is_loading(&live_key()));
  }

  #[tokio::test]
  async fn test_dropped_caller_does_not_cancel_fetch() {
    let cache = cache(StubFetcher::ok(live_payload(70.0)).with_delay(StdDuration::from_millis(30)));

    let ensure = cache.ensure(live_key(), Duration::minutes(1));
    // Poll once so the fetch starts, then give up on it
    let _ = tokio::time::timeout(StdDuration::from_millis(1), ensure).await;

    tokio::time::sleep(StdDuration::from_millis(100)).await;
    assert!(cache.store().read(&live_key()).is_loaded());
  }

  #[tokio::test]
  async fn test_slow_fetch_times_out() {
    let cache = cache(StubFetcher::ok(live_payload(70.0)).with_delay(StdDuration::from_secs(5)))
      .with_fetch_timeout(StdDuration::from_millis(20));

    cache.ensure(live_key(), Duration::minutes(1)).await;

    let entry = cache.store().read(&live_key());
    assert!(!entry.is_loading());
    assert!(entry.error().unwrap().contains("timed out"));
  }

  #[tokio::test]
  async fn test_keys_are_fetched_independently() {
    let xref = Payload::Xref(vec![RoomXref {
      point_slice_id: 8935,
      room: "325".to_string(),
      room_type: "Project Room".to_string(),
      building: Building::Watt,
      floor: "3rd Floor".to_string(),
      reading_type: "Zone Temp".to_string(),
      alias: "RM 325".to_string(),
    }]);
    let cache = cache(StubFetcher::ok(xref.clone()));
    let max_age = Duration::minutes(1);

    cache.ensure_data(ResourceKind::Xref, &watt_temp(), max_age).await.unwrap();
    cache
      .ensure_data(ResourceKind::Hist, &watt_temp().with_id(8935), max_age)
      .await
      .unwrap();

    assert_eq!(cache.fetcher().calls(), 2);
    // Live shares building and metric but has its own slot
    assert_eq!(cache.read_data(ResourceKind::Live, &watt_temp()).unwrap(), Entry::default());
    assert_eq!(
      cache.read_data(ResourceKind::Xref, &watt_temp()).unwrap().data(),
      Some(&xref)
    );
  }

  #[tokio::test]
  async fn test_subscribers_see_fetch_lifecycle() {
    let cache = cache(StubFetcher::ok(live_payload(70.0)));
    let mut events = cache.subscribe();

    cache.ensure(live_key(), Duration::minutes(1)).await;

    assert_eq!(events.recv().await.unwrap(), live_key());
    assert_eq!(events.recv().await.unwrap(), live_key());
    assert!(cache.store().read(&live_key()).is_loaded());
  }

  #[tokio::test]
  async fn test_panicking_fetch_is_recorded_as_failed() {
    let storage = Arc::new(MemoryStorage::default());
    let cache = DataCache::new(
      CacheStore::new(Arc::clone(&storage)),
      PanickingFetcher::default(),
    );

    cache.ensure(live_key(), Duration::minutes(1)).await;

    let entry = cache.store().read(&live_key());
    assert!(!entry.is_loading());
    assert_eq!(entry.error(), Some(ABORTED));
    assert!(!CacheStore::hydrate(Arc::clone(&storage)).is_loading(&live_key()));

    // The key is no longer in flight, so the next call fetches again
    cache.ensure(live_key(), Duration::minutes(1)).await;
    assert_eq!(cache.fetcher().calls(), 2);
  }

  #[tokio::test]
  async fn test_refresh_ignores_fresh_entry() {
    let cache = cache(StubFetcher::ok(live_payload(70.0)));
    cache.store().write(&live_key(), Entry::loaded(live_payload(60.0)));

    cache.refresh(live_key()).await;

    assert_eq!(cache.fetcher().calls(), 1);
    assert_eq!(cache.store().read(&live_key()).data(), Some(&live_payload(70.0)));
  }

  #[tokio::test]
  async fn test_refresh_on_every_tick() {
    let cache = cache(StubFetcher::ok(live_payload(70.0)).with_delay(StdDuration::from_millis(5)));
    let mut events = EventHandler::new(StdDuration::from_millis(50), cache.subscribe());

    let mut ticks = 0;
    while ticks < 4 {
      if let Some(Event::Tick) = events.next().await {
        ticks += 1;
        let cache = cache.clone();
        tokio::spawn(async move { cache.refresh(live_key()).await });
      }
    }
    tokio::time::sleep(StdDuration::from_millis(30)).await;

    assert_eq!(cache.fetcher().calls(), 4);
  }
}
