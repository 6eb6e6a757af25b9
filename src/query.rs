//! Cache-backed query handles for consumers that poll for data.
//!
//! Inspired by TanStack Query: a `Query<T>` is a subscription to one cache
//! key. It fetches through the shared [`QueryCache`], so two screens watching
//! the same key cause one network call, and it notices when the key is
//! invalidated or the cache is cleared.
//!
//! # Example
//!
//! ```ignore
//! let hub = hub.clone();
//! let mut query = cache.subscribe(&HubQueryKey::Categories, QueryOptions::default(), move || {
//!     let hub = hub.clone();
//!     async move { hub.categories().await }
//! });
//!
//! // Mount
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(query.data()),
//!     QueryState::Success(data) => render_data(data),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::cache::{CacheKey, CacheResult, QueryCache, QueryKey, QueryOptions};
use crate::error::{ApiError, ApiResult};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(ApiError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, ApiResult<T>> + Send + Sync>;

type Delivery<T> = ApiResult<CacheResult<Arc<T>>>;

impl QueryCache {
  /// Subscribe to `key`. The entry is kept from garbage collection while the
  /// returned query is alive. Nothing is fetched until [`Query::fetch`].
  pub fn subscribe<K, T, F, Fut>(&self, key: &K, options: QueryOptions, fetcher: F) -> Query<T>
  where
    K: QueryKey + ?Sized,
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    let key = key.cache_key();
    self.retain(&key);
    Query {
      cache: self.clone(),
      retained_epoch: self.epoch(),
      key,
      options,
      state: QueryState::Idle,
      previous: None,
      fetcher: Box::new(move || fetcher().boxed()),
      receiver: None,
      seen_version: None,
      mounted: false,
    }
  }
}

/// Async query bound to one cache key.
///
/// Query<T> tracks:
/// - Loading/success/error states, keeping the last data while refetching
/// - Async result handling via channels
/// - The key's invalidation counter, refetching when it moves
/// - The cache epoch, resetting when the cache is cleared
pub struct Query<T> {
  cache: QueryCache,
  key: CacheKey,
  options: QueryOptions,
  state: QueryState<Arc<T>>,
  /// Last successful data, shown while a refetch runs or after it fails
  previous: Option<Arc<T>>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Delivery<T>>>,
  seen_version: Option<u64>,
  retained_epoch: u64,
  mounted: bool,
}

impl<T: Send + Sync + 'static> Query<T> {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<Arc<T>> {
    &self.state
  }

  /// Latest data, including the previous result while a refetch is running.
  pub fn data(&self) -> Option<&T> {
    self.state.data().or(self.previous.as_ref()).map(Arc::as_ref)
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.state.error()
  }

  /// Mount (first call) or re-read the key, fetching only if the cached data is stale.
  ///
  /// This is a no-op if the query is already loading. With `refetch_on_mount`
  /// off, the first call shows whatever the cache holds, stale or not.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    let first_mount = !self.mounted;
    self.mounted = true;

    if first_mount && !self.options.refetch_on_mount && self.adopt_cached() {
      return;
    }
    self.start_fetch(false);
  }

  /// The consumer regained focus.
  pub fn focus(&mut self) {
    if self.options.refetch_on_focus && !self.state.is_loading() {
      self.mounted = true;
      self.start_fetch(false);
    }
  }

  /// Force a refetch, even if already loading or data is fresh.
  pub fn refetch(&mut self) {
    // Cancel any pending delivery by dropping the receiver
    self.receiver = None;
    self.mounted = true;
    self.start_fetch(true);
  }

  /// Poll for results and for outside changes to the key.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    if self.cache.epoch() != self.retained_epoch {
      trace!(key = %self.key, "cache cleared, resetting query");
      self.retained_epoch = self.cache.epoch();
      self.cache.retain(&self.key);
      self.state = QueryState::Idle;
      self.previous = None;
      self.receiver = None;
      self.seen_version = None;
      self.mounted = false;
      return true;
    }

    let Some(receiver) = &mut self.receiver else {
      return self.refetch_if_invalidated();
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(Ok(result)) => {
        self.seen_version = self.cache.version(&self.key);
        self.previous = Some(result.data.clone());
        self.state = QueryState::Success(result.data);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending
        self.state = QueryState::Error(ApiError::Transport {
          operation: self.key.to_string(),
          attempts: 0,
          status: None,
          message: "query was cancelled".to_string(),
        });
        self.receiver = None;
        true
      }
    }
  }

  /// An active query whose key was invalidated refetches on its own.
  fn refetch_if_invalidated(&mut self) -> bool {
    if !self.mounted || self.state.is_loading() {
      return false;
    }
    let Some(seen) = self.seen_version else {
      return false;
    };
    match self.cache.version(&self.key) {
      Some(current) if current != seen => {
        trace!(key = %self.key, "key invalidated, refetching");
        self.start_fetch(false);
        true
      }
      _ => false,
    }
  }

  fn adopt_cached(&mut self) -> bool {
    let snapshot = self.cache.snapshot::<_, T>(&self.key);
    match snapshot.data {
      Some(data) => {
        self.seen_version = self.cache.version(&self.key);
        self.previous = Some(data.clone());
        self.state = QueryState::Success(data);
        true
      }
      None => false,
    }
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self, force: bool) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    if let QueryState::Success(data) = &self.state {
      self.previous = Some(data.clone());
    }
    self.state = QueryState::Loading;

    let cache = self.cache.clone();
    let key = self.key.clone();
    let options = self.options.clone();
    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = if force {
        cache.refresh(&key, &options, move || future).await
      } else {
        cache.fetch(&key, &options, move || future).await
      };
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    if self.cache.epoch() == self.retained_epoch {
      self.cache.release(&self.key);
    }
  }
}

// Query is not Clone because the fetcher is boxed and receiver is owned.
// If you need to share a query, wrap it in Arc<Mutex<Query<T>>>.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}
