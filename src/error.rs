//! Error types shared by the cache store and the fetch coordinator.

use serde_json::Value;
use thiserror::Error;

/// Failure reported by a key/value storage backend.
///
/// These never reach fetch callers: a failed read degrades to a miss and a
/// failed write is logged and skipped.
#[derive(Error, Debug)]
pub enum StorageError {
  #[error("storage quota exceeded while writing {key}")]
  QuotaExceeded { key: String },

  #[error("storage lock poisoned: {0}")]
  Poisoned(String),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("{0}")]
  Other(String),
}

/// Failure raised by an [`HttpTransport`](crate::fetch::HttpTransport).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
  /// The request was aborted through its cancel signal.
  #[error("request cancelled")]
  Cancelled,

  #[error("request timed out")]
  Timeout,

  #[error("network error: {0}")]
  Network(String),

  #[error("malformed response: {0}")]
  Malformed(String),
}

/// Error surfaced to callers in the `error` field of a fetch status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
  /// The server answered with a status above 201. The body is kept as-is.
  #[error("HTTP status {status}")]
  HttpStatus { status: u16, body: Value },

  #[error("transport error: {0}")]
  Transport(TransportError),

  /// The activation was torn down before the request finished.
  #[error("fetch cancelled")]
  Cancelled,

  /// The response body could not be converted into the requested type.
  #[error("failed to decode response: {0}")]
  Decode(String),

  #[error("invalid url {url}: {reason}")]
  InvalidUrl { url: String, reason: String },
}

impl FetchError {
  /// Whether this error came from cancelling the request rather than a real failure.
  pub fn is_cancelled(&self) -> bool {
    matches!(
      self,
      FetchError::Cancelled | FetchError::Transport(TransportError::Cancelled)
    )
  }

  /// Status code for HTTP failures.
  pub fn status(&self) -> Option<u16> {
    match self {
      FetchError::HttpStatus { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<TransportError> for FetchError {
  fn from(err: TransportError) -> Self {
    match err {
      TransportError::Cancelled => FetchError::Cancelled,
      other => FetchError::Transport(other),
    }
  }
}
