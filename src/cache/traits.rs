//! Core traits and types for the caching system.

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::oneshot;

use crate::error::{NetworkError, StoreError};

/// String key/value persistence backing the cache.
///
/// Values are opaque text (JSON in practice). Implementations must be safe to share
/// between the UI task and background revalidation tasks.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

  fn remove(&self, key: &str) -> Result<(), StoreError>;

  /// All stored keys starting with `prefix`.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

  /// Remove every key starting with `prefix`, returning how many were removed.
  fn remove_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
    let keys = self.keys_with_prefix(prefix)?;
    for key in &keys {
      self.remove(key)?;
    }
    Ok(keys.len())
  }
}

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

/// Hand-driven clock for tests.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct ManualClock(std::sync::Arc<std::sync::atomic::AtomicI64>);

#[cfg(test)]
impl ManualClock {
  pub fn new(start_ms: i64) -> Self {
    Self(std::sync::Arc::new(std::sync::atomic::AtomicI64::new(
      start_ms,
    )))
  }

  pub fn advance(&self, by: chrono::Duration) {
    self
      .0
      .fetch_add(by.num_milliseconds(), std::sync::atomic::Ordering::SeqCst);
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now_ms(&self) -> i64 {
    self.0.load(std::sync::atomic::Ordering::SeqCst)
  }
}

/// Pending background refetch started for a stale-but-usable entry.
///
/// Dropping it discards the fresh value for this consumer; the cache is still updated.
#[derive(Debug)]
pub struct Revalidation<T> {
  rx: oneshot::Receiver<Result<T, NetworkError>>,
}

impl<T> Revalidation<T> {
  pub(crate) fn new(rx: oneshot::Receiver<Result<T, NetworkError>>) -> Self {
    Self { rx }
  }

  /// Non-blocking check. `None` while the refetch is still running.
  pub fn try_take(&mut self) -> Option<Result<T, NetworkError>> {
    match self.rx.try_recv() {
      Ok(result) => Some(result),
      Err(oneshot::error::TryRecvError::Empty) => None,
      Err(oneshot::error::TryRecvError::Closed) => Some(Err(NetworkError::Transport(
        "background refresh was dropped".to_string(),
      ))),
    }
  }

  /// Wait for the refetch to settle.
  pub async fn wait(self) -> Result<T, NetworkError> {
    self.rx.await.unwrap_or_else(|_| {
      Err(NetworkError::Transport(
        "background refresh was dropped".to_string(),
      ))
    })
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Set when stale data was served and a background refetch is in flight
  pub revalidation: Option<Revalidation<T>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
      revalidation: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at_ms: i64, revalidation: Option<Revalidation<T>>) -> Self {
    Self {
      data,
      source: if revalidation.is_some() {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Utc.timestamp_millis_opt(cached_at_ms).single(),
      revalidation,
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
  /// Data from cache, older than the last write; refetch running in background
  CacheStale,
}
