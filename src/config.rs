use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{CacheConfig, DEFAULT_INVALIDATION_MS, DEFAULT_PREFIX};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheSection,
  /// Path of the SQLite store (defaults to $XDG_DATA_HOME/kvfetch/cache.db)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSection {
  /// Key namespace (default "rx")
  pub prefix: Option<String>,
  /// Time-to-live in milliseconds (default 5 minutes)
  pub invalidation_ms: Option<u64>,
  /// Build identifier compared against stored records
  pub version: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kvfetch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kvfetch/config.yaml
  ///
  /// No file at all means defaults.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kvfetch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kvfetch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Cache defaults for every fetch, with the version resolved from the environment.
  pub fn cache_defaults(&self) -> CacheConfig {
    CacheConfig {
      prefix: self
        .cache
        .prefix
        .clone()
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
      version: self
        .cache
        .version
        .clone()
        .or_else(Self::get_build_version)
        .unwrap_or_default(),
      invalidation_ms: self.cache.invalidation_ms.unwrap_or(DEFAULT_INVALIDATION_MS),
      ..CacheConfig::default()
    }
  }

  /// Get the build identifier from environment variables.
  ///
  /// Checks KVFETCH_VERSION first, then GITHUB_SHA when running under GitHub Actions.
  pub fn get_build_version() -> Option<String> {
    build_version_from(|name| std::env::var(name).ok())
  }
}

fn build_version_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
  lookup("KVFETCH_VERSION")
    .filter(|v| !v.is_empty())
    .or_else(|| {
      lookup("GITHUB_ACTIONS")
        .filter(|v| !v.is_empty())
        .and_then(|_| lookup("GITHUB_SHA"))
    })
    .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn test_parse_full_config() {
    let config = Config::from_yaml(
      "cache:\n  prefix: app\n  invalidation_ms: 1000\n  version: build-7\ndatabase: /tmp/kv.db\n",
    )
    .unwrap();

    let defaults = config.cache_defaults();
    assert_eq!(defaults.prefix, "app");
    assert_eq!(defaults.invalidation_ms, 1000);
    assert_eq!(defaults.version, "build-7");
    assert!(!defaults.bypass);
    assert_eq!(config.database, Some(PathBuf::from("/tmp/kv.db")));
  }

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    let defaults = config.cache_defaults();
    assert_eq!(defaults.prefix, DEFAULT_PREFIX);
    assert_eq!(defaults.invalidation_ms, DEFAULT_INVALIDATION_MS);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/kvfetch.yaml"))).is_err());
  }

  #[test]
  fn test_build_version_lookup() {
    let env = |pairs: &[(&str, &str)]| {
      let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
      move |name: &str| map.get(name).cloned()
    };

    assert_eq!(build_version_from(env(&[])), None);
    assert_eq!(build_version_from(env(&[("GITHUB_SHA", "abc")])), None);
    assert_eq!(
      build_version_from(env(&[("GITHUB_ACTIONS", "true"), ("GITHUB_SHA", "abc")])),
      Some("abc".to_string())
    );
    assert_eq!(
      build_version_from(env(&[
        ("KVFETCH_VERSION", "v2"),
        ("GITHUB_ACTIONS", "true"),
        ("GITHUB_SHA", "abc"),
      ])),
      Some("v2".to_string())
    );
  }
}
