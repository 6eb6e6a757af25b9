//! Cache layer that sits between consumers and the gateway.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::key::{CacheKey, QueryKey};
use super::traits::{CacheResult, FetchStatus, QuerySnapshot, QueryOptions};
use crate::error::{ApiError, ApiResult};

type Erased = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<Erased, ApiError>>>;

struct Cached {
  value: Erased,
  at: Instant,
  wall: DateTime<Utc>,
}

struct InFlight {
  id: u64,
  /// Entry version when the fetch started; a later version means the result is already stale
  started_version: u64,
  future: SharedFetch,
}

struct Entry {
  data: Option<Cached>,
  error: Option<ApiError>,
  status: FetchStatus,
  invalidated: bool,
  /// Bumped on every invalidation
  version: u64,
  in_flight: Option<InFlight>,
  subscribers: usize,
  idle_since: Option<Instant>,
}

impl Entry {
  fn new() -> Self {
    Self {
      data: None,
      error: None,
      status: FetchStatus::Idle,
      invalidated: false,
      version: 0,
      in_flight: None,
      subscribers: 0,
      idle_since: Some(Instant::now()),
    }
  }

  /// The running fetch, unless it started before the latest invalidation.
  fn current_flight(&self) -> Option<&InFlight> {
    self
      .in_flight
      .as_ref()
      .filter(|flight| flight.started_version == self.version)
  }

  fn fresh(&self, stale_time: Duration) -> Option<&Cached> {
    if self.invalidated {
      return None;
    }
    self.data.as_ref().filter(|c| c.at.elapsed() < stale_time)
  }

  fn snapshot<T: Send + Sync + 'static>(&self) -> QuerySnapshot<T> {
    QuerySnapshot {
      data: self
        .data
        .as_ref()
        .and_then(|c| c.value.clone().downcast::<T>().ok()),
      status: self.status,
      error: self.error.clone(),
      fetched_at: self.data.as_ref().map(|c| c.wall),
      invalidated: self.invalidated,
    }
  }
}

#[derive(Default)]
struct Inner {
  entries: HashMap<CacheKey, Entry>,
  /// Bumped by `clear`; results of fetches started in an older epoch are not stored
  epoch: u64,
  next_fetch: u64,
}

enum Plan {
  Join(u64, SharedFetch),
  Start,
}

/// Keyed, stale-aware cache of fetch results.
///
/// Concurrent fetches of one key share a single in-flight future, so the
/// network sees one call no matter how many consumers ask. Values of any
/// type can live side by side; each key is expected to always hold the same
/// type. The map lock is never held across an await.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Mutex<Inner>>,
  gc_time: Duration,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new(Duration::from_secs(300))
  }
}

impl QueryCache {
  /// `gc_time` is how long an entry nobody subscribes to is kept.
  pub fn new(gc_time: Duration) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner::default())),
      gc_time,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Serve from cache when fresh, otherwise fetch (or join the fetch already running).
  pub async fn fetch<K, T, F, Fut>(
    &self,
    key: &K,
    options: &QueryOptions,
    fetcher: F,
  ) -> ApiResult<CacheResult<Arc<T>>>
  where
    K: QueryKey + ?Sized,
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    self.run(key.cache_key(), options, false, fetcher).await
  }

  /// Like [`fetch`](Self::fetch) but ignores freshness. Still joins a running
  /// fetch if it started after the key was last invalidated.
  pub async fn refresh<K, T, F, Fut>(
    &self,
    key: &K,
    options: &QueryOptions,
    fetcher: F,
  ) -> ApiResult<CacheResult<Arc<T>>>
  where
    K: QueryKey + ?Sized,
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    self.run(key.cache_key(), options, true, fetcher).await
  }

  async fn run<T, F, Fut>(
    &self,
    key: CacheKey,
    options: &QueryOptions,
    force: bool,
    fetcher: F,
  ) -> ApiResult<CacheResult<Arc<T>>>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    let (epoch, plan) = {
      let mut inner = self.lock();
      let epoch = inner.epoch;
      let entry = inner.entries.entry(key.clone()).or_insert_with(Entry::new);

      match entry.current_flight() {
        Some(flight) => (epoch, Plan::Join(flight.id, flight.future.clone())),
        None => {
          if !force {
            if let Some(cached) = entry.fresh(options.stale_time) {
              trace!(key = %key, "cache hit");
              let wall = cached.wall;
              let value = cached.value.clone();
              return downcast::<T>(&key, value).map(|data| CacheResult::from_cache(data, wall));
            }
          }
          (epoch, Plan::Start)
        }
      }
    };

    let (epoch, fetch_id, future) = match plan {
      Plan::Join(id, future) => {
        trace!(key = %key, "joining in-flight fetch");
        (epoch, id, future)
      }
      Plan::Start => {
        // Build the future outside the lock; the fetcher is caller code.
        let pending = fetcher();
        let future = async move { pending.await.map(|v| Arc::new(v) as Erased) }
          .boxed()
          .shared();

        let mut inner = self.lock();
        let epoch = inner.epoch;
        let id = inner.next_fetch;
        inner.next_fetch += 1;
        let entry = inner.entries.entry(key.clone()).or_insert_with(Entry::new);

        match entry.current_flight() {
          // Someone else started one in between; ours is dropped unpolled.
          Some(flight) => (epoch, flight.id, flight.future.clone()),
          None => {
            // A fetch begun before the last invalidation is superseded; its
            // waiters still get its answer but `settle` ignores it.
            debug!(key = %key, "cache miss, fetching");
            entry.in_flight = Some(InFlight {
              id,
              started_version: entry.version,
              future: future.clone(),
            });
            entry.status = FetchStatus::Loading;
            (epoch, id, future)
          }
        }
      }
    };

    let outcome = future.await;
    self.settle(&key, epoch, fetch_id, &outcome);

    match outcome {
      Ok(value) => downcast::<T>(&key, value).map(CacheResult::from_network),
      Err(error) => {
        if options.offline_fallback && error.is_transport() {
          let cached = self
            .lock()
            .entries
            .get(&key)
            .and_then(|e| e.data.as_ref().map(|c| (c.value.clone(), c.wall)));
          if let Some((value, wall)) = cached {
            warn!(key = %key, error = %error, "serving stale data");
            return downcast::<T>(&key, value).map(|data| CacheResult::offline(data, wall));
          }
        }
        Err(error)
      }
    }
  }

  /// Record the outcome of fetch `fetch_id`. Only the first awaiting caller does the work.
  fn settle(&self, key: &CacheKey, epoch: u64, fetch_id: u64, outcome: &Result<Erased, ApiError>) {
    let mut inner = self.lock();
    if inner.epoch != epoch {
      debug!(key = %key, "discarding result fetched before the cache was cleared");
      return;
    }
    let Some(entry) = inner.entries.get_mut(key) else {
      return;
    };
    if entry.in_flight.as_ref().map(|f| f.id) != Some(fetch_id) {
      return;
    }
    let Some(flight) = entry.in_flight.take() else {
      return;
    };

    match outcome {
      Ok(value) => {
        entry.data = Some(Cached {
          value: value.clone(),
          at: Instant::now(),
          wall: Utc::now(),
        });
        entry.error = None;
        entry.status = FetchStatus::Success;
        entry.invalidated = entry.version != flight.started_version;
      }
      Err(error) => {
        entry.error = Some(error.clone());
        entry.status = FetchStatus::Error;
      }
    }
  }

  /// Mark exactly this key stale. Returns whether it was cached.
  pub fn invalidate<K: QueryKey + ?Sized>(&self, key: &K) -> bool {
    let key = key.cache_key();
    let mut inner = self.lock();
    match inner.entries.get_mut(&key) {
      Some(entry) => {
        entry.invalidated = true;
        entry.version += 1;
        debug!(key = %key, "invalidated");
        true
      }
      None => false,
    }
  }

  /// Mark the key and every key below it (by segment) stale. Returns how many.
  pub fn invalidate_tree<K: QueryKey + ?Sized>(&self, prefix: &K) -> usize {
    let prefix = prefix.cache_key();
    let mut inner = self.lock();
    let mut count = 0;
    for (key, entry) in inner.entries.iter_mut() {
      if key.starts_with(&prefix) {
        entry.invalidated = true;
        entry.version += 1;
        count += 1;
      }
    }
    debug!(prefix = %prefix, count, "invalidated tree");
    count
  }

  /// Drop everything. Fetches still running will not repopulate the cache.
  pub fn clear(&self) {
    let mut inner = self.lock();
    let dropped = inner.entries.len();
    inner.entries.clear();
    inner.epoch += 1;
    debug!(dropped, "cache cleared");
  }

  /// Changes every time the cache is cleared.
  pub fn epoch(&self) -> u64 {
    self.lock().epoch
  }

  /// Invalidation counter of a key, `None` if not cached.
  pub fn version<K: QueryKey + ?Sized>(&self, key: &K) -> Option<u64> {
    self.lock().entries.get(&key.cache_key()).map(|e| e.version)
  }

  pub fn snapshot<K, T>(&self, key: &K) -> QuerySnapshot<T>
  where
    K: QueryKey + ?Sized,
    T: Send + Sync + 'static,
  {
    self
      .lock()
      .entries
      .get(&key.cache_key())
      .map(Entry::snapshot)
      .unwrap_or_else(QuerySnapshot::empty)
  }

  pub fn contains<K: QueryKey + ?Sized>(&self, key: &K) -> bool {
    self.lock().entries.contains_key(&key.cache_key())
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub(crate) fn retain(&self, key: &CacheKey) {
    let mut inner = self.lock();
    let entry = inner.entries.entry(key.clone()).or_insert_with(Entry::new);
    entry.subscribers += 1;
    entry.idle_since = None;
  }

  pub(crate) fn release(&self, key: &CacheKey) {
    let mut inner = self.lock();
    if let Some(entry) = inner.entries.get_mut(key) {
      entry.subscribers = entry.subscribers.saturating_sub(1);
      if entry.subscribers == 0 {
        entry.idle_since = Some(Instant::now());
      }
    }
  }

  /// Remove entries that nobody has observed for `gc_time`. Returns how many.
  pub fn collect_garbage(&self) -> usize {
    let gc_time = self.gc_time;
    let mut inner = self.lock();
    let before = inner.entries.len();
    inner.entries.retain(|_, entry| {
      let idle_long_enough = entry
        .idle_since
        .map(|since| since.elapsed() >= gc_time)
        .unwrap_or(false);
      entry.subscribers > 0 || entry.in_flight.is_some() || !idle_long_enough
    });
    let removed = before - inner.entries.len();
    if removed > 0 {
      trace!(removed, "collected idle cache entries");
    }
    removed
  }

  /// Run [`collect_garbage`](Self::collect_garbage) every `period` until the cache is dropped.
  pub fn spawn_collector(&self, period: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(&self.inner);
    let gc_time = self.gc_time;
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          break;
        };
        QueryCache { inner, gc_time }.collect_garbage();
      }
    })
  }
}

fn downcast<T: Send + Sync + 'static>(key: &CacheKey, value: Erased) -> ApiResult<Arc<T>> {
  value
    .downcast::<T>()
    .map_err(|_| ApiError::decode(format!("cache {}", key), "cached value has a different type"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::CacheSource;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn counting(
    counter: &Arc<AtomicU32>,
    delay: Duration,
  ) -> impl FnOnce() -> BoxFuture<'static, ApiResult<u32>> {
    let counter = counter.clone();
    move || {
      async move {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(delay).await;
        Ok(n)
      }
      .boxed()
    }
  }

  fn transport_error() -> ApiError {
    ApiError::Transport {
      operation: "fetch".to_string(),
      attempts: 3,
      status: Some(503),
      message: "unavailable".to_string(),
    }
  }

  #[tokio::test]
  async fn test_concurrent_fetches_share_one_call() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["post", "1", "comments-and-tags"]);
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::live();

    let (a, b) = tokio::join!(
      cache.fetch(&key, &options, counting(&calls, Duration::from_millis(50))),
      cache.fetch(&key, &options, counting(&calls, Duration::from_millis(50))),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*a.unwrap().data, 1);
    assert_eq!(*b.unwrap().data, 1);
  }

  #[tokio::test]
  async fn test_fresh_data_served_from_cache() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["categories"]);
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::default();

    let first = cache.fetch(&key, &options, counting(&calls, Duration::ZERO)).await.unwrap();
    let second = cache.fetch(&key, &options, counting(&calls, Duration::ZERO)).await.unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert!(second.cached_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_zero_staleness_always_refetches() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["feed", "Academic Hub", "0"]);
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::live();

    cache.fetch(&key, &options, counting(&calls, Duration::ZERO)).await.unwrap();
    let second = cache.fetch(&key, &options, counting(&calls, Duration::ZERO)).await.unwrap();

    assert_eq!(*second.data, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_refresh_ignores_freshness() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["tags"]);
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::default();

    cache.fetch(&key, &options, counting(&calls, Duration::ZERO)).await.unwrap();
    let refreshed = cache.refresh(&key, &options, counting(&calls, Duration::ZERO)).await.unwrap();

    assert_eq!(refreshed.source, CacheSource::Network);
    assert_eq!(*refreshed.data, 2);
  }

  #[tokio::test]
  async fn test_invalidate_is_exact() {
    let cache = QueryCache::default();
    let post = CacheKey::new(["post", "1"]);
    let activity = post.child("comments-and-tags");
    let post_calls = Arc::new(AtomicU32::new(0));
    let activity_calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::default();

    cache.fetch(&post, &options, counting(&post_calls, Duration::ZERO)).await.unwrap();
    cache.fetch(&activity, &options, counting(&activity_calls, Duration::ZERO)).await.unwrap();

    assert!(cache.invalidate(&post));
    assert!(!cache.invalidate(&CacheKey::new(["post", "2"])));
    assert_eq!(cache.version(&post), Some(1));
    assert_eq!(cache.version(&activity), Some(0));

    cache.fetch(&post, &options, counting(&post_calls, Duration::ZERO)).await.unwrap();
    let again = cache.fetch(&activity, &options, counting(&activity_calls, Duration::ZERO)).await.unwrap();

    assert_eq!(post_calls.load(Ordering::SeqCst), 2);
    assert_eq!(activity_calls.load(Ordering::SeqCst), 1);
    assert_eq!(again.source, CacheSource::CacheFresh);
  }

  #[tokio::test]
  async fn test_invalidate_tree_by_segment() {
    let cache = QueryCache::default();
    let options = QueryOptions::default();
    let calls = Arc::new(AtomicU32::new(0));
    let keys = [
      CacheKey::new(["feed", "Academic Hub", "0"]),
      CacheKey::new(["feed", "Academic Hub", "1"]),
      CacheKey::new(["feed", "Academic Hub 2", "0"]),
    ];
    for key in &keys {
      cache.fetch(key, &options, counting(&calls, Duration::ZERO)).await.unwrap();
    }

    let count = cache.invalidate_tree(&CacheKey::new(["feed", "Academic Hub"]));

    assert_eq!(count, 2);
    assert!(cache.snapshot::<_, u32>(&keys[0]).invalidated);
    assert!(cache.snapshot::<_, u32>(&keys[1]).invalidated);
    assert!(!cache.snapshot::<_, u32>(&keys[2]).invalidated);
  }

  #[tokio::test]
  async fn test_invalidation_during_fetch_keeps_entry_stale() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["post", "9"]);
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::default();

    let fetching = cache.fetch(&key, &options, counting(&calls, Duration::from_millis(50)));
    let invalidating = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      cache.invalidate(&key);
    };
    let (result, _) = tokio::join!(fetching, invalidating);
    result.unwrap();

    assert!(cache.snapshot::<_, u32>(&key).invalidated);
    cache.fetch(&key, &options, counting(&calls, Duration::ZERO)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_read_after_invalidation_does_not_join_older_fetch() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["feed", "Academic Hub", "0"]);
    let server_state = Arc::new(AtomicU32::new(1));
    let options = QueryOptions::default();

    let slow_state = server_state.clone();
    let before = cache.fetch(&key, &options, move || async move {
      let seen = slow_state.load(Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok(seen)
    });
    let after = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      server_state.store(2, Ordering::SeqCst);
      cache.invalidate(&key);
      let state = server_state.clone();
      cache
        .fetch(&key, &options, move || async move { Ok(state.load(Ordering::SeqCst)) })
        .await
    };
    let (before, after) = tokio::join!(before, after);

    assert_eq!(*before.unwrap().data, 1);
    let after = after.unwrap();
    assert_eq!(after.source, CacheSource::Network);
    assert_eq!(*after.data, 2);

    // The superseded fetch finishing late does not overwrite the newer value.
    let cached = cache.snapshot::<_, u32>(&key);
    assert_eq!(cached.data.as_deref(), Some(&2));
    assert!(!cached.invalidated);
    assert_eq!(cached.status, FetchStatus::Success);
  }

  #[tokio::test]
  async fn test_clear_discards_late_results() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["current-user"]);
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::default();
    let epoch = cache.epoch();

    let fetching = cache.fetch(&key, &options, counting(&calls, Duration::from_millis(50)));
    let clearing = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      cache.clear();
    };
    let (result, _) = tokio::join!(fetching, clearing);

    // The caller still gets its answer; the cache does not keep it.
    assert_eq!(*result.unwrap().data, 1);
    assert!(cache.is_empty());
    assert_ne!(cache.epoch(), epoch);
  }

  #[tokio::test]
  async fn test_error_kept_alongside_previous_data() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["user", "u1"]);
    let options = QueryOptions::live();

    cache.fetch(&key, &options, || async { Ok(7u32) }).await.unwrap();
    let err = cache
      .fetch(&key, &options, || async { Err::<u32, _>(transport_error()) })
      .await
      .unwrap_err();
    assert!(err.is_transport());

    let snapshot = cache.snapshot::<_, u32>(&key);
    assert_eq!(snapshot.status, FetchStatus::Error);
    assert_eq!(snapshot.data.as_deref(), Some(&7));
    assert_eq!(snapshot.error, Some(transport_error()));
    assert!(!snapshot.is_loading());

    cache.fetch(&key, &options, || async { Ok(8u32) }).await.unwrap();
    assert_eq!(cache.snapshot::<_, u32>(&key).error, None);
  }

  #[tokio::test]
  async fn test_offline_fallback_serves_stale_data() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["categories"]);
    let options = QueryOptions::live().with_offline_fallback(true);

    cache.fetch(&key, &options, || async { Ok(vec!["Academic Hub"]) }).await.unwrap();
    let result = cache
      .fetch(&key, &options, || async {
        Err::<Vec<&'static str>, _>(transport_error())
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(*result.data, vec!["Academic Hub"]);

    // Rejections are never masked.
    let rejected = cache
      .fetch(&key, &options, || async {
        Err::<Vec<&'static str>, _>(ApiError::unauthenticated("fetch categories"))
      })
      .await;
    assert!(rejected.unwrap_err().is_unauthenticated());
  }

  #[tokio::test]
  async fn test_type_mismatch_is_an_error() {
    let cache = QueryCache::default();
    let key = CacheKey::new(["mixed"]);
    let options = QueryOptions::default();

    cache.fetch(&key, &options, || async { Ok(1u32) }).await.unwrap();
    let err = cache
      .fetch(&key, &options, || async { Ok("text".to_string()) })
      .await
      .unwrap_err();
    assert!(matches!(err, ApiError::Decode { .. }));
  }

  #[tokio::test]
  async fn test_garbage_collection_spares_subscribed_entries() {
    let cache = QueryCache::new(Duration::ZERO);
    let options = QueryOptions::default();
    let watched = CacheKey::new(["post", "1"]);
    let idle = CacheKey::new(["post", "2"]);

    cache.retain(&watched);
    cache.fetch(&watched, &options, || async { Ok(1u32) }).await.unwrap();
    cache.fetch(&idle, &options, || async { Ok(2u32) }).await.unwrap();

    assert_eq!(cache.collect_garbage(), 1);
    assert!(cache.contains(&watched));
    assert!(!cache.contains(&idle));

    cache.release(&watched);
    assert_eq!(cache.collect_garbage(), 1);
    assert!(cache.is_empty());
  }
}
