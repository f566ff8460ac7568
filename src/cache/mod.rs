//! Persisted response cache.
//!
//! This module keeps one JSON record per namespaced top-level key in a
//! key/value text store. A record:
//! - carries an absolute expiry plus optional `version`/`invalidator` tags
//! - holds any number of subkey payloads that accumulate across writes
//! - is evicted as a whole when a read finds it expired or mismatched

mod record;
mod storage;
mod store;
mod traits;

pub use record::{
  CacheConfig, CacheOptions, CacheRecord, DEFAULT_INVALIDATION_MS, DEFAULT_PREFIX,
};
pub use storage::{MemoryStorage, SqliteStorage};
pub use store::CacheStore;
pub use traits::{CacheSource, Clock, KeyValueStore, ManualClock, SystemClock};
