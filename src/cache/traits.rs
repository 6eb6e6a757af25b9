//! Core types for the query cache.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ApiError;

/// Per-subscription policy knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
  /// Age after which cached data is refetched on the next access
  pub stale_time: Duration,
  /// Fetch when a query is mounted even if the cache already has data
  pub refetch_on_mount: bool,
  /// Fetch (if stale) when the consumer regains focus
  pub refetch_on_focus: bool,
  /// On a transport failure, serve the previous data instead of the error
  pub offline_fallback: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(60),
      refetch_on_mount: true,
      refetch_on_focus: true,
      offline_fallback: false,
    }
  }
}

impl QueryOptions {
  /// Zero staleness: every access goes to the network (concurrent ones still share a fetch).
  pub fn live() -> Self {
    Self {
      stale_time: Duration::ZERO,
      ..Self::default()
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_offline_fallback(mut self, enabled: bool) -> Self {
    self.offline_fallback = enabled;
    self
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed; serving what we had.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network unavailable, serving stale cached data
  Offline,
}

/// Fetch status of a cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchStatus {
  #[default]
  Idle,
  Loading,
  Success,
  Error,
}

/// Point-in-time view of one entry: `{data, is_loading, error}` plus bookkeeping.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
  /// Last successful data; kept while a refetch is running or after it failed
  pub data: Option<Arc<T>>,
  pub status: FetchStatus,
  /// Error from the most recent fetch, cleared by the next success
  pub error: Option<ApiError>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub invalidated: bool,
}

impl<T> QuerySnapshot<T> {
  pub fn is_loading(&self) -> bool {
    self.status == FetchStatus::Loading
  }

  pub(crate) fn empty() -> Self {
    Self {
      data: None,
      status: FetchStatus::Idle,
      error: None,
      fetched_at: None,
      invalidated: false,
    }
  }
}
