//! Cache configuration and the persisted record format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "rx";

/// Default time-to-live: 5 minutes.
pub const DEFAULT_INVALIDATION_MS: u64 = 5 * 60 * 1000;

/// Member names reserved for record metadata.
pub const RESERVED_FIELDS: [&str; 3] = ["invalidation", "version", "invalidator"];

/// Fully resolved settings for one cache operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
  /// Namespace prepended to every top-level key, joined with `_`
  pub prefix: String,
  /// Opaque tag; a stored record with a different tag is discarded
  pub invalidator: String,
  /// Build or deploy identifier, compared like `invalidator`
  pub version: String,
  /// Time-to-live from write time
  pub invalidation_ms: u64,
  /// Skip both cache read and cache write
  pub bypass: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: DEFAULT_PREFIX.to_string(),
      invalidator: String::new(),
      version: String::new(),
      invalidation_ms: DEFAULT_INVALIDATION_MS,
      bypass: false,
    }
  }
}

impl CacheConfig {
  /// Storage key for `top_key` under this config's prefix.
  pub fn full_key(&self, top_key: &str) -> String {
    let prefix = if self.prefix.is_empty() {
      DEFAULT_PREFIX
    } else {
      &self.prefix
    };
    format!("{}_{}", prefix, top_key)
  }

  /// Overlay caller-supplied options on top of this config.
  pub fn merged(&self, options: &CacheOptions) -> Self {
    Self {
      prefix: options.prefix.clone().unwrap_or_else(|| self.prefix.clone()),
      invalidator: options
        .invalidator
        .clone()
        .unwrap_or_else(|| self.invalidator.clone()),
      version: options.version.clone().unwrap_or_else(|| self.version.clone()),
      invalidation_ms: options.invalidation_ms.unwrap_or(self.invalidation_ms),
      bypass: options.bypass.unwrap_or(self.bypass),
    }
  }
}

/// Partial cache settings supplied per call. Unset fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheOptions {
  pub prefix: Option<String>,
  pub invalidator: Option<String>,
  pub version: Option<String>,
  pub invalidation_ms: Option<u64>,
  pub bypass: Option<bool>,
}

impl CacheOptions {
  pub fn bypass() -> Self {
    Self {
      bypass: Some(true),
      ..Self::default()
    }
  }

  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = Some(prefix.into());
    self
  }

  pub fn with_invalidator(mut self, invalidator: impl Into<String>) -> Self {
    self.invalidator = Some(invalidator.into());
    self
  }

  pub fn with_version(mut self, version: impl Into<String>) -> Self {
    self.version = Some(version.into());
    self
  }

  pub fn with_invalidation_ms(mut self, ms: u64) -> Self {
    self.invalidation_ms = Some(ms);
    self
  }
}

/// One persisted record: expiry and tags plus a map of subkey payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
  /// Absolute expiry, epoch milliseconds
  pub invalidation: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub invalidator: Option<String>,
  #[serde(flatten)]
  pub entries: Map<String, Value>,
}

impl CacheRecord {
  /// Fresh record metadata for a write at `now_ms` under `config`.
  pub fn fresh(config: &CacheConfig, now_ms: i64) -> Self {
    let ttl = i64::try_from(config.invalidation_ms).unwrap_or(i64::MAX);
    Self {
      invalidation: now_ms.saturating_add(ttl),
      version: non_empty(&config.version),
      invalidator: non_empty(&config.invalidator),
      entries: Map::new(),
    }
  }

  pub fn parse(raw: &str) -> serde_json::Result<Self> {
    serde_json::from_str(raw)
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string(self)
  }

  /// Whether the record passes the tag and expiry checks.
  ///
  /// A tag check is skipped when the expected value is empty.
  pub fn is_valid(&self, invalidator: &str, version: &str, now_ms: i64) -> bool {
    if !invalidator.is_empty() && self.invalidator.as_deref() != Some(invalidator) {
      return false;
    }
    if self.invalidation <= now_ms {
      return false;
    }
    if !version.is_empty() && self.version.as_deref() != Some(version) {
      return false;
    }
    true
  }

  pub fn get(&self, subkey: &str) -> Option<&Value> {
    self.entries.get(subkey)
  }
}

fn non_empty(s: &str) -> Option<String> {
  if s.is_empty() {
    None
  } else {
    Some(s.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_full_key_falls_back_to_default_prefix() {
    let config = CacheConfig::default();
    assert_eq!(config.full_key("products"), "rx_products");

    let config = CacheConfig {
      prefix: String::new(),
      ..CacheConfig::default()
    };
    assert_eq!(config.full_key("products"), "rx_products");

    let config = CacheConfig::default().merged(&CacheOptions::default().with_prefix("app"));
    assert_eq!(config.full_key("products"), "app_products");
  }

  #[test]
  fn test_merged_keeps_unset_fields() {
    let base = CacheConfig {
      version: "abc123".to_string(),
      ..CacheConfig::default()
    };
    let merged = base.merged(&CacheOptions::bypass().with_invalidation_ms(10));

    assert!(merged.bypass);
    assert_eq!(merged.invalidation_ms, 10);
    assert_eq!(merged.version, "abc123");
    assert_eq!(merged.prefix, DEFAULT_PREFIX);
  }

  #[test]
  fn test_record_wire_format() {
    let config = CacheConfig {
      version: "v1".to_string(),
      ..CacheConfig::default()
    };
    let mut record = CacheRecord::fresh(&config, 1_000);
    record.entries.insert("/items".to_string(), json!([1, 2]));

    let value: Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
    assert_eq!(
      value,
      json!({"invalidation": 301_000, "version": "v1", "/items": [1, 2]})
    );

    let parsed = CacheRecord::parse(&value.to_string()).unwrap();
    assert_eq!(parsed, record);
  }

  #[test]
  fn test_parse_rejects_non_records() {
    assert!(CacheRecord::parse("not json").is_err());
    assert!(CacheRecord::parse("null").is_err());
    assert!(CacheRecord::parse(r#"{"version":"v1"}"#).is_err());
  }

  #[test]
  fn test_validity_checks() {
    let config = CacheConfig {
      invalidator: "A".to_string(),
      version: "v1".to_string(),
      ..CacheConfig::default()
    };
    let record = CacheRecord::fresh(&config, 0);

    assert!(record.is_valid("A", "v1", 1));
    assert!(record.is_valid("", "", 1));
    assert!(!record.is_valid("B", "v1", 1));
    assert!(!record.is_valid("A", "v2", 1));
    assert!(!record.is_valid("A", "v1", DEFAULT_INVALIDATION_MS as i64));
  }
}
