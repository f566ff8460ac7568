//! HTTP GET with a persisted key/value response cache.
//!
//! [`cache::CacheStore`] keeps one JSON record per namespaced key in a
//! [`cache::KeyValueStore`], with time-based expiry and tag-based
//! invalidation. [`fetch::FetchCoordinator`] serves requests from it or
//! fetches through an [`fetch::HttpTransport`] and writes the result back.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;

pub use cache::{CacheConfig, CacheOptions, CacheStore, KeyValueStore};
pub use error::{FetchError, StorageError, TransportError};
pub use fetch::{Activation, FetchCoordinator, FetchStatus, RequestOptions};
