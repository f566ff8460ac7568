use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

use kvfetch::cache::{CacheOptions, CacheStore, KeyValueStore, SqliteStorage};
use kvfetch::config::Config;
use kvfetch::fetch::{FetchCoordinator, RequestOptions, ReqwestTransport};

#[derive(Parser, Debug)]
#[command(name = "kvfetch")]
#[command(about = "HTTP GET with a persisted key/value response cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kvfetch/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a URL, serving it from the cache when possible
  Get {
    /// Top-level cache key
    cache_key: String,
    url: String,
    /// Skip the cache for both read and write
    #[arg(long)]
    bypass: bool,
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long)]
    invalidator: Option<String>,
    /// Time-to-live in milliseconds
    #[arg(long)]
    ttl_ms: Option<u64>,
    /// Extra request header, as `name:value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
  },
  /// Remove every cached key under a prefix
  Invalidate {
    /// Defaults to the configured prefix
    prefix: Option<String>,
  },
  /// List stored keys
  Keys,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_stderr)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let storage = match &config.database {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  let store = CacheStore::new(storage);
  let coordinator =
    FetchCoordinator::new(store, ReqwestTransport::default()).with_defaults(config.cache_defaults());

  match args.command {
    Command::Get {
      cache_key,
      url,
      bypass,
      prefix,
      invalidator,
      ttl_ms,
      headers,
      timeout,
    } => {
      let options = CacheOptions {
        prefix,
        invalidator,
        version: None,
        invalidation_ms: ttl_ms,
        bypass: Some(bypass),
      };
      let mut request = RequestOptions::default();
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Header must be name:value, got {}", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(secs) = timeout {
        request = request.with_timeout(Duration::from_secs(secs));
      }

      let mut activation =
        coordinator.run::<serde_json::Value>(&cache_key, &url, &options, &request);
      let status = activation.settled().await;

      if let Some(error) = &status.error {
        return Err(eyre!("{}", error));
      }
      info!(cache_key, url, source = ?status.source, "fetched");
      let data = status.data.clone().unwrap_or_default();
      println!("{}", serde_json::to_string_pretty(&data)?);
    }
    Command::Invalidate { prefix } => {
      coordinator.invalidate_cache(prefix.as_deref());
      info!(prefix = ?prefix, "cache invalidated");
    }
    Command::Keys => {
      let keys = coordinator
        .store()
        .storage()
        .keys()
        .map_err(|e| eyre!("Failed to list keys: {}", e))?;
      for key in keys {
        println!("{}", key);
      }
    }
  }

  Ok(())
}

/// Install the tracing subscriber. Filter comes from KVFETCH_LOG.
fn init_tracing(log_stderr: bool) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_env("KVFETCH_LOG").unwrap_or_else(|_| EnvFilter::new("kvfetch=info"));

  if log_stderr {
    fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .try_init()
      .map_err(|e| eyre!("Failed to init logging: {}", e))?;
    return Ok(None);
  }

  let log_dir = log_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;
  let appender = tracing_appender::rolling::daily(&log_dir, "kvfetch.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to init logging: {}", e))?;

  Ok(Some(guard))
}

fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("kvfetch").join("logs"))
}
