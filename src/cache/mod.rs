//! Best-effort local cache for remote API reads.
//!
//! This module is API-agnostic:
//! - Stores JSON entries `{data, timestamp, expiry}` in a pluggable key/value store
//! - Serves fresh entries without touching the network
//! - Serves entries older than the last successful write while refetching in background
//! - Treats corrupt entries and storage failures as misses, never as errors

mod key;
mod layer;
mod policy;
mod storage;
mod traits;

pub use key::{CacheKey, CACHE_PREFIX};
pub use layer::{CacheService, DEFAULT_TTL_MINUTES};
pub use storage::{MemoryStore, SqliteStore};
pub use traits::{CacheResult, CacheSource, KeyValueStore, Revalidation};

#[cfg(test)]
pub use traits::ManualClock;
