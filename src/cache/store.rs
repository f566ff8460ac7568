//! Cache store: read-validate-or-evict and write-merge over a key/value backend.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::record::{CacheConfig, CacheRecord, RESERVED_FIELDS};
use super::traits::{Clock, KeyValueStore, SystemClock};

/// Cache operations over an injected key/value store.
///
/// Storage failures never escape: reads degrade to a miss, writes are
/// logged and skipped.
pub struct CacheStore<S: KeyValueStore> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  /// Serializes the read-merge-write in `set` and eviction in `get`
  write_lock: Arc<Mutex<()>>,
}

impl<S: KeyValueStore> CacheStore<S> {
  /// Create a new cache store over the given backend, using the wall clock.
  pub fn new(storage: S) -> Self {
    Self::from_shared(Arc::new(storage))
  }

  pub fn from_shared(storage: Arc<S>) -> Self {
    Self {
      storage,
      clock: Arc::new(SystemClock),
      write_lock: Arc::new(Mutex::new(())),
    }
  }

  /// Replace the clock used for expiry.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Read and check the record at `key`.
  ///
  /// Returns `None` when the key is missing, unreadable, unparsable, or fails
  /// the invalidator, expiry or version check. Empty expectations skip their check.
  pub fn validate(&self, key: &str, invalidator: &str, version: &str) -> Option<CacheRecord> {
    match self.lookup(key, invalidator, version) {
      Lookup::Valid(record) => Some(record),
      Lookup::Missing | Lookup::Invalid | Lookup::Unreadable => None,
    }
  }

  /// Look up `subkey` under `top_key`, evicting the whole record if it is invalid.
  ///
  /// A backend read error is a miss but leaves the stored value alone.
  pub fn get(&self, top_key: &str, subkey: &str, config: &CacheConfig) -> Option<Value> {
    if top_key.is_empty() {
      return None;
    }

    let key = config.full_key(top_key);
    match self.lookup(&key, &config.invalidator, &config.version) {
      Lookup::Valid(mut record) => {
        let value = record.entries.remove(subkey);
        debug!(key, subkey, hit = value.is_some(), "cache lookup");
        value
      }
      Lookup::Invalid => {
        self.evict_if_invalid(&key, config);
        None
      }
      Lookup::Missing | Lookup::Unreadable => None,
    }
  }

  /// Typed lookup. A stored value that does not fit `T` counts as a miss.
  pub fn get_as<T: DeserializeOwned>(
    &self,
    top_key: &str,
    subkey: &str,
    config: &CacheConfig,
  ) -> Option<T> {
    let value = self.get(top_key, subkey, config)?;
    match serde_json::from_value(value) {
      Ok(data) => Some(data),
      Err(e) => {
        warn!(top_key, subkey, error = %e, "cached value has unexpected shape");
        None
      }
    }
  }

  /// Write `value` to `subkey` under `top_key`, merging into any existing record.
  ///
  /// Other subkeys of an existing record are kept as they are. The record's
  /// expiry and tags are replaced by this write's.
  pub fn set(&self, top_key: &str, subkey: &str, value: Value, config: &CacheConfig) {
    if top_key.is_empty() {
      return;
    }
    if RESERVED_FIELDS.contains(&subkey) {
      warn!(top_key, subkey, "refusing to cache under a reserved member name");
      return;
    }

    let key = config.full_key(top_key);
    let _guard = self.lock_writes();

    let mut record = CacheRecord::fresh(config, self.clock.now_ms());
    if let Some(existing) = self.read_existing(&key) {
      record.entries = existing.entries;
    }
    record.entries.insert(subkey.to_string(), value);

    let json = match record.to_json() {
      Ok(json) => json,
      Err(e) => {
        warn!(key, error = %e, "failed to serialize cache record");
        return;
      }
    };

    match self.storage.set(&key, &json) {
      Ok(()) => debug!(key, subkey, "cache write"),
      Err(e) => warn!(key, error = %e, "cache write skipped"),
    }
  }

  /// Serialize `value` and write it like [`CacheStore::set`].
  pub fn set_as<T: Serialize>(&self, top_key: &str, subkey: &str, value: &T, config: &CacheConfig) {
    match serde_json::to_value(value) {
      Ok(value) => self.set(top_key, subkey, value, config),
      Err(e) => warn!(top_key, subkey, error = %e, "failed to serialize value for cache"),
    }
  }

  /// Remove every stored key starting with `prefix`.
  pub fn invalidate_by_prefix(&self, prefix: &str) {
    // Snapshot first so removals cannot disturb iteration
    let keys = match self.storage.keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(prefix, error = %e, "failed to list cache keys");
        return;
      }
    };

    let mut removed = 0usize;
    for key in keys.iter().filter(|k| k.starts_with(prefix)) {
      match self.storage.remove(key) {
        Ok(()) => removed += 1,
        Err(e) => warn!(key, error = %e, "failed to remove cache key"),
      }
    }
    debug!(prefix, removed, "cache invalidated");
  }

  /// Existing record at `key`, without validation. Unparsable values are dropped.
  fn read_existing(&self, key: &str) -> Option<CacheRecord> {
    let raw = self.storage.get(key).ok()??;
    match CacheRecord::parse(&raw) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(key, error = %e, "replacing unparsable cache value");
        None
      }
    }
  }

  fn lookup(&self, key: &str, invalidator: &str, version: &str) -> Lookup {
    let raw = match self.storage.get(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return Lookup::Missing,
      Err(e) => {
        warn!(key, error = %e, "cache read failed");
        return Lookup::Unreadable;
      }
    };

    let record = match CacheRecord::parse(&raw) {
      Ok(record) => record,
      Err(e) => {
        warn!(key, error = %e, "invalid cache value");
        return Lookup::Invalid;
      }
    };

    if !record.is_valid(invalidator, version, self.clock.now_ms()) {
      debug!(key, "cache record failed validation");
      return Lookup::Invalid;
    }

    Lookup::Valid(record)
  }

  /// Remove `key` if it still fails validation.
  ///
  /// Runs under the write lock so a record written by a concurrent `set`
  /// since the first read is kept.
  fn evict_if_invalid(&self, key: &str, config: &CacheConfig) {
    let _guard = self.lock_writes();
    if !matches!(
      self.lookup(key, &config.invalidator, &config.version),
      Lookup::Invalid
    ) {
      return;
    }
    if let Err(e) = self.storage.remove(key) {
      warn!(key, error = %e, "failed to evict cache key");
    }
  }

  fn lock_writes(&self) -> MutexGuard<'_, ()> {
    match self.write_lock.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}

/// Outcome of reading one stored record.
enum Lookup {
  Valid(CacheRecord),
  Missing,
  /// Unparsable or failed a check
  Invalid,
  /// The backend could not be read
  Unreadable,
}

impl<S: KeyValueStore> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      write_lock: Arc::clone(&self.write_lock),
    }
  }
}
