//! Cached entry shape, staleness rules and the global write timestamp.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::traits::{Clock, KeyValueStore};

/// Storage key holding the epoch-ms of the most recent successful mutation.
pub const LAST_WRITE_KEY: &str = "previas:meta:last_write";

/// Persisted form of a cached value.
///
/// `expiry` is always `timestamp + ttl` at the moment the entry is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntry<T> {
  pub data: T,
  pub timestamp: i64,
  pub expiry: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_stale: Option<bool>,
}

impl<T> CachedEntry<T> {
  pub fn new(data: T, now_ms: i64, ttl_ms: i64) -> Self {
    Self {
      data,
      timestamp: now_ms,
      expiry: now_ms + ttl_ms,
      is_stale: None,
    }
  }
}

/// Verdict of the staleness policy for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
  pub usable: bool,
  pub should_revalidate: bool,
}

impl Freshness {
  pub const EXPIRED: Freshness = Freshness {
    usable: false,
    should_revalidate: false,
  };
  pub const STALE: Freshness = Freshness {
    usable: true,
    should_revalidate: true,
  };
  pub const FRESH: Freshness = Freshness {
    usable: true,
    should_revalidate: false,
  };
}

/// Decide whether an entry may be served.
///
/// Expiry wins over everything. An unexpired entry written before the last
/// mutation (or explicitly flagged stale) is served but must be refetched.
pub fn assess<T>(entry: &CachedEntry<T>, last_write_ms: i64, now_ms: i64) -> Freshness {
  if now_ms > entry.expiry {
    Freshness::EXPIRED
  } else if entry.timestamp < last_write_ms || entry.is_stale == Some(true) {
    Freshness::STALE
  } else {
    Freshness::FRESH
  }
}

/// Tracks the process-wide write timestamp in the backing store.
#[derive(Clone)]
pub struct WriteTracker {
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
}

impl WriteTracker {
  pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  /// Stamp "now" as the last write. Call once per successful mutation.
  pub fn record_write(&self) -> i64 {
    let now = self.clock.now_ms();
    if let Err(e) = self.store.set(LAST_WRITE_KEY, &now.to_string()) {
      tracing::warn!(error = %e, "failed to persist write timestamp");
    }
    now
  }

  /// Epoch-ms of the last recorded write, or 0 if none (or unreadable).
  pub fn last_write(&self) -> i64 {
    match self.store.get(LAST_WRITE_KEY) {
      Ok(Some(raw)) => raw.trim().parse().unwrap_or(0),
      Ok(None) => 0,
      Err(e) => {
        tracing::warn!(error = %e, "failed to read write timestamp");
        0
      }
    }
  }

  pub fn reset(&self) {
    if let Err(e) = self.store.remove(LAST_WRITE_KEY) {
      tracing::warn!(error = %e, "failed to clear write timestamp");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStore;
  use crate::cache::traits::ManualClock;
  use chrono::Duration;

  const TTL: i64 = 30 * 60 * 1000;

  #[test]
  fn test_entry_expiry_is_timestamp_plus_ttl() {
    let entry = CachedEntry::new(1, 1_000, TTL);
    assert_eq!(entry.expiry, 1_000 + TTL);
  }

  #[test]
  fn test_fresh_entry() {
    let entry = CachedEntry::new("x", 1_000, TTL);
    assert_eq!(assess(&entry, 0, 2_000), Freshness::FRESH);
    // Written in the same millisecond as the entry: not older than the write
    assert_eq!(assess(&entry, 1_000, 2_000), Freshness::FRESH);
  }

  #[test]
  fn test_write_after_entry_marks_stale() {
    let entry = CachedEntry::new("x", 1_000, TTL);
    let verdict = assess(&entry, 1_500, 2_000);
    assert!(verdict.usable);
    assert!(verdict.should_revalidate);
    assert!(entry.expiry > 2_000);
  }

  #[test]
  fn test_expiry_supersedes_staleness() {
    let entry = CachedEntry::new("x", 1_000, TTL);
    let after_expiry = entry.expiry + 1;
    assert_eq!(assess(&entry, 0, after_expiry), Freshness::EXPIRED);
    assert_eq!(assess(&entry, 5_000, after_expiry), Freshness::EXPIRED);
    // Exactly at expiry is still usable
    assert!(assess(&entry, 0, entry.expiry).usable);
  }

  #[test]
  fn test_flagged_entry_is_stale() {
    let mut entry = CachedEntry::new("x", 1_000, TTL);
    entry.is_stale = Some(true);
    assert_eq!(assess(&entry, 0, 2_000), Freshness::STALE);
  }

  #[test]
  fn test_entry_wire_format() {
    let entry = CachedEntry::new(vec![1, 2], 10, 20);
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(
      json,
      serde_json::json!({"data": [1, 2], "timestamp": 10, "expiry": 30})
    );

    let parsed: CachedEntry<Vec<i32>> =
      serde_json::from_str(r#"{"data":[3],"timestamp":1,"expiry":2,"isStale":true}"#).unwrap();
    assert_eq!(parsed.is_stale, Some(true));
  }

  #[test]
  fn test_write_tracker() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(42_000);
    let tracker = WriteTracker::new(store.clone(), Arc::new(clock.clone()));

    assert_eq!(tracker.last_write(), 0);
    assert_eq!(tracker.record_write(), 42_000);

    clock.advance(Duration::seconds(1));
    tracker.record_write();
    assert_eq!(tracker.last_write(), 43_000);

    store.set(LAST_WRITE_KEY, "garbage").unwrap();
    assert_eq!(tracker.last_write(), 0);

    tracker.reset();
    assert_eq!(store.get(LAST_WRITE_KEY).unwrap(), None);
  }
}
