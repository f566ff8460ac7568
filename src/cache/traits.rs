//! Core traits and types for the caching system.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::error::StorageError;

/// Synchronous key/value text store backing the cache.
///
/// Implementors own their durability semantics. All methods take `&self`;
/// backends guard their state internally.
pub trait KeyValueStore: Send + Sync {
  /// Raw text stored under `key`, if any.
  fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

  /// Store `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<(), StorageError>;

  /// Snapshot of every key currently stored.
  fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Source of "now" for expiry checks, in epoch milliseconds.
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

/// Clock that only moves when told to. Used to simulate expiry.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicI64,
}

impl ManualClock {
  pub fn new(start_ms: i64) -> Self {
    Self {
      now: AtomicI64::new(start_ms),
    }
  }

  pub fn advance(&self, ms: i64) {
    self.now.fetch_add(ms, Ordering::SeqCst);
  }

  pub fn set(&self, ms: i64) {
    self.now.store(ms, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_ms(&self) -> i64 {
    self.now.load(Ordering::SeqCst)
  }
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from a valid cache record
  Cache,
  /// Fresh data from network
  Network,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_moves_only_when_told() {
    let clock = ManualClock::new(1_000);
    assert_eq!(clock.now_ms(), 1_000);

    clock.advance(250);
    assert_eq!(clock.now_ms(), 1_250);

    clock.set(5);
    assert_eq!(clock.now_ms(), 5);
  }
}
