//! Cache layer that orchestrates caching logic with network fetching.

use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::key::{CacheKey, CACHE_PREFIX};
use super::policy::{assess, CachedEntry, Freshness, WriteTracker};
use super::traits::{CacheResult, Clock, KeyValueStore, Revalidation, SystemClock};
use crate::error::NetworkError;

/// Entry lifetime used unless configured otherwise.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Storage key of the "how many prévias to show" preference.
pub const RECORD_LIMIT_KEY: &str = "previas:meta:record_limit";
pub const DEFAULT_RECORD_LIMIT: usize = 10;
pub const MAX_RECORD_LIMIT: usize = 100;

/// Read-through cache with stale-while-revalidate semantics.
///
/// Cheap to clone; clones share the store, the clock and the enabled flag.
/// Storage failures are logged and swallowed: caching is best-effort.
#[derive(Clone)]
pub struct CacheService {
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  tracker: WriteTracker,
  ttl: Duration,
  enabled: Arc<AtomicBool>,
}

impl CacheService {
  /// Create a new cache over the given store, using the wall clock.
  pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
    Self::with_clock(store, Arc::new(SystemClock))
  }

  pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      tracker: WriteTracker::new(store.clone(), clock.clone()),
      store,
      clock,
      ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
      enabled: Arc::new(AtomicBool::new(true)),
    }
  }

  /// Set the lifetime of new entries.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled.load(Ordering::SeqCst)
  }

  /// Turn caching on or off. Disabling wipes every cached entry.
  pub fn set_enabled(&self, enabled: bool) {
    let was = self.enabled.swap(enabled, Ordering::SeqCst);
    if was && !enabled {
      self.clear_all();
    }
    info!(enabled, "cache toggled");
  }

  pub fn now_ms(&self) -> i64 {
    self.clock.now_ms()
  }

  /// Read an entry. Missing, disabled and unparseable entries all read as `None`;
  /// an unparseable entry is also dropped.
  pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CachedEntry<T>> {
    if !self.is_enabled() {
      return None;
    }

    let key_str = key.to_string();
    let raw = match self.store.get(&key_str) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key = %key_str, error = %e, "cache read failed");
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        debug!(key = %key_str, error = %e, "dropping corrupt cache entry");
        self.remove(key);
        None
      }
    }
  }

  /// Write an entry stamped with "now". Never fails for the caller.
  pub fn set<T: Serialize>(&self, key: &CacheKey, data: &T) {
    self.set_at(key, data, self.clock.now_ms());
  }

  /// Write an entry stamped with the moment its fetch started.
  ///
  /// A response that was requested before a write is older than that write,
  /// however late it arrives.
  pub fn set_at<T: Serialize>(&self, key: &CacheKey, data: &T, fetched_at_ms: i64) {
    if !self.is_enabled() {
      return;
    }

    let entry = CachedEntry::new(data, fetched_at_ms, self.ttl.num_milliseconds());
    let key_str = key.to_string();
    let result = serde_json::to_string(&entry)
      .map_err(|e| e.to_string())
      .and_then(|json| self.store.set(&key_str, &json).map_err(|e| e.to_string()));

    if let Err(e) = result {
      warn!(key = %key_str, error = %e, "skipping cache write");
    }
  }

  pub fn remove(&self, key: &CacheKey) {
    if let Err(e) = self.store.remove(&key.to_string()) {
      warn!(key = %key, error = %e, "cache remove failed");
    }
  }

  /// Remove every entry whose key starts with `prefix`.
  pub fn remove_by_prefix(&self, prefix: &str) -> usize {
    match self.store.remove_prefix(prefix) {
      Ok(n) => {
        debug!(prefix, removed = n, "cache prefix invalidated");
        n
      }
      Err(e) => {
        warn!(prefix, error = %e, "cache prefix remove failed");
        0
      }
    }
  }

  /// Wipe every cache entry and the write timestamp. Preferences survive.
  pub fn clear_all(&self) {
    let removed = self.remove_by_prefix(CACHE_PREFIX);
    self.tracker.reset();
    info!(removed, "cache cleared");
  }

  /// Flag every entry under `prefix` for background refresh on next read.
  pub fn mark_stale(&self, prefix: &str) {
    let keys = match self.store.keys_with_prefix(prefix) {
      Ok(keys) => keys,
      Err(e) => {
        warn!(prefix, error = %e, "cache scan failed");
        return;
      }
    };

    for key in keys {
      let Ok(Some(raw)) = self.store.get(&key) else {
        continue;
      };
      let Ok(mut entry) = serde_json::from_str::<CachedEntry<serde_json::Value>>(&raw) else {
        let _ = self.store.remove(&key);
        continue;
      };
      entry.is_stale = Some(true);
      if let Ok(json) = serde_json::to_string(&entry) {
        if let Err(e) = self.store.set(&key, &json) {
          warn!(key = %key, error = %e, "failed to flag stale entry");
        }
      }
    }
  }

  /// Record a successful mutation. Every entry written before now becomes stale.
  pub fn record_write(&self) -> i64 {
    self.tracker.record_write()
  }

  pub fn last_write(&self) -> i64 {
    self.tracker.last_write()
  }

  pub fn freshness<T>(&self, entry: &CachedEntry<T>) -> Freshness {
    assess(entry, self.tracker.last_write(), self.clock.now_ms())
  }

  /// Fetch with read-through caching.
  ///
  /// 1. Fresh entry: returned immediately, no network
  /// 2. Stale entry (older than the last write): returned immediately, refetch spawned
  /// 3. Expired or missing: entry dropped, fetched synchronously, stored
  pub async fn fetch<T, F, Fut>(
    &self,
    key: &CacheKey,
    fetcher: F,
  ) -> Result<CacheResult<T>, NetworkError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, NetworkError>> + Send + 'static,
  {
    if let Some(entry) = self.get::<T>(key) {
      let freshness = self.freshness(&entry);

      if freshness.usable && !freshness.should_revalidate {
        debug!(key = %key.description(), "cache hit");
        return Ok(CacheResult::from_cache(entry.data, entry.timestamp, None));
      }

      if freshness.usable {
        debug!(key = %key.description(), "serving stale entry, revalidating");
        let started = self.clock.now_ms();
        let revalidation = self.spawn_revalidation(key.clone(), started, fetcher());
        return Ok(CacheResult::from_cache(
          entry.data,
          entry.timestamp,
          Some(revalidation),
        ));
      }

      debug!(key = %key.description(), "cache entry expired");
      self.remove(key);
    } else {
      debug!(key = %key.description(), "cache miss");
    }

    let started = self.clock.now_ms();
    let data = fetcher().await?;
    self.set_at(key, &data, started);
    Ok(CacheResult::from_network(data))
  }

  /// Refetch `key` in the background and overwrite the entry on success.
  pub fn refresh_in_background<T, Fut>(&self, key: CacheKey, future: Fut) -> JoinHandle<()>
  where
    T: Serialize + Send + 'static,
    Fut: Future<Output = Result<T, NetworkError>> + Send + 'static,
  {
    let cache = self.clone();
    let started = self.clock.now_ms();
    tokio::spawn(async move {
      match future.await {
        Ok(data) => {
          cache.set_at(&key, &data, started);
          debug!(key = %key.description(), "background refresh stored");
        }
        Err(e) => warn!(key = %key.description(), error = %e, "background refresh failed"),
      }
    })
  }

  fn spawn_revalidation<T, Fut>(
    &self,
    key: CacheKey,
    started: i64,
    future: Fut,
  ) -> Revalidation<T>
  where
    T: Serialize + Send + 'static,
    Fut: Future<Output = Result<T, NetworkError>> + Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    let cache = self.clone();

    tokio::spawn(async move {
      let result = future.await;
      match &result {
        Ok(data) => cache.set_at(&key, data, started),
        Err(e) => warn!(key = %key.description(), error = %e, "revalidation failed"),
      }
      // Consumer may have gone away; the cache is updated regardless
      let _ = tx.send(result);
    });

    Revalidation::new(rx)
  }

  /// Number of prévias shown in a patient's history.
  pub fn record_limit(&self) -> usize {
    match self.store.get(RECORD_LIMIT_KEY) {
      Ok(Some(raw)) => raw
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=MAX_RECORD_LIMIT).contains(n))
        .unwrap_or(DEFAULT_RECORD_LIMIT),
      _ => DEFAULT_RECORD_LIMIT,
    }
  }

  /// Persist the record limit, clamped to the valid range. Returns the stored value.
  pub fn set_record_limit(&self, limit: usize) -> usize {
    let limit = limit.clamp(1, MAX_RECORD_LIMIT);
    if let Err(e) = self.store.set(RECORD_LIMIT_KEY, &limit.to_string()) {
      warn!(error = %e, "failed to persist record limit");
    }
    limit
  }
}
