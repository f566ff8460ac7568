//! Fetch coordinator: get-or-fetch over the cache store and an HTTP transport.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::activation::{Activation, FetchStatus, Phase, Transition, TransitionSender};
use super::target::RequestTarget;
use super::transport::{cancel_pair, CancelSignal, HttpResponse, HttpTransport, RequestOptions};
use crate::cache::{CacheConfig, CacheOptions, CacheStore, KeyValueStore};
use crate::error::{FetchError, TransportError};

/// Highest status code treated as success.
pub const MAX_SUCCESS_STATUS: u16 = 201;

/// Orchestrates cache lookups, network fetches and cache write-back.
///
/// Each [`FetchCoordinator::run`] is one activation: it checks the cache,
/// fetches on a miss or bypass, and stores successful responses.
pub struct FetchCoordinator<S: KeyValueStore, H: HttpTransport> {
  store: CacheStore<S>,
  transport: Arc<H>,
  defaults: CacheConfig,
}

impl<S, H> FetchCoordinator<S, H>
where
  S: KeyValueStore + 'static,
  H: HttpTransport + 'static,
{
  pub fn new(store: CacheStore<S>, transport: H) -> Self {
    Self {
      store,
      transport: Arc::new(transport),
      defaults: CacheConfig::default(),
    }
  }

  /// Set the defaults that per-call options are merged over.
  pub fn with_defaults(mut self, defaults: CacheConfig) -> Self {
    self.defaults = defaults;
    self
  }

  pub fn store(&self) -> &CacheStore<S> {
    &self.store
  }

  pub fn defaults(&self) -> &CacheConfig {
    &self.defaults
  }

  pub fn transport(&self) -> &H {
    &self.transport
  }

  /// Start a get-or-fetch for `url`, cached under `cache_key`.
  ///
  /// The returned activation is loading. A cache hit is already queued as its
  /// next transition; otherwise a request is spawned on the tokio runtime, so
  /// this must be called from within one.
  pub fn run<T>(
    &self,
    cache_key: &str,
    url: &str,
    options: &CacheOptions,
    request: &RequestOptions,
  ) -> Activation<T>
  where
    T: DeserializeOwned + Send + 'static,
  {
    let (mut activation, tx) = Activation::start();

    let target = match RequestTarget::parse(url) {
      Ok(target) => target,
      Err(e) => {
        warn!(url, error = %e, "invalid request url");
        let error = FetchError::InvalidUrl {
          url: url.to_string(),
          reason: e.to_string(),
        };
        emit(&tx, Phase::Failed, FetchStatus::failed(error));
        return activation;
      }
    };

    activation.checking_cache();
    let mut config = self.defaults.merged(options);
    config.invalidator = target.invalidator(&config.invalidator);

    if !config.bypass {
      if let Some(data) = self.store.get_as::<T>(cache_key, &target.subkey, &config) {
        debug!(cache_key, subkey = %target.subkey, "serving from cache");
        emit(&tx, Phase::ServedFromCache, FetchStatus::from_cache(data));
        return activation;
      }
    }

    let (handle, signal) = cancel_pair();
    activation.fetching(handle);

    let job = FetchJob {
      store: self.store.clone(),
      transport: Arc::clone(&self.transport),
      cache_key: cache_key.to_string(),
      target,
      config,
      request: request.clone(),
    };
    tokio::spawn(job.execute(signal, tx));

    activation
  }

  /// Remove every cached key under `prefix`, or under the default prefix.
  ///
  /// An empty prefix means the default one, never every key in the backend.
  pub fn invalidate_cache(&self, prefix: Option<&str>) {
    let prefix = prefix
      .filter(|p| !p.is_empty())
      .unwrap_or(&self.defaults.prefix);
    self.store.invalidate_by_prefix(prefix);
  }
}

/// Everything one spawned request needs.
struct FetchJob<S: KeyValueStore, H: HttpTransport> {
  store: CacheStore<S>,
  transport: Arc<H>,
  cache_key: String,
  target: RequestTarget,
  config: CacheConfig,
  request: RequestOptions,
}

impl<S: KeyValueStore, H: HttpTransport> FetchJob<S, H> {
  async fn execute<T: DeserializeOwned>(self, signal: CancelSignal, tx: TransitionSender<T>) {
    debug!(url = %self.target.url, bypass = self.config.bypass, "fetching");
    let result = self
      .transport
      .get(&self.target.url, &self.request, signal.clone())
      .await;

    // A torn-down activation neither emits nor writes
    if signal.is_cancelled() {
      debug!(url = %self.target.url, "fetch cancelled");
      return;
    }

    match classify::<T>(result) {
      Ok((data, body)) => {
        // Decoding can take a while, so look again right before writing.
        // A deactivate racing past this check still lands after the write.
        if signal.is_cancelled() {
          debug!(url = %self.target.url, "fetch cancelled before cache write");
          return;
        }
        if !self.config.bypass {
          self
            .store
            .set(&self.cache_key, &self.target.subkey, body, &self.config);
        }
        emit(&tx, Phase::Succeeded, FetchStatus::from_network(data));
      }
      Err(FetchError::Cancelled) => {
        debug!(url = %self.target.url, "transport reported cancellation");
      }
      Err(error) => {
        debug!(url = %self.target.url, error = %error, "fetch failed");
        emit(&tx, Phase::Failed, FetchStatus::failed(error));
      }
    }
  }
}

/// Sort a transport result into data (plus the raw body to cache) or an error.
fn classify<T: DeserializeOwned>(
  result: Result<HttpResponse, TransportError>,
) -> Result<(T, Value), FetchError> {
  let response = result?;
  if response.status > MAX_SUCCESS_STATUS {
    return Err(FetchError::HttpStatus {
      status: response.status,
      body: response.body,
    });
  }

  let data = serde_json::from_value(response.body.clone())
    .map_err(|e| FetchError::Decode(e.to_string()))?;
  Ok((data, response.body))
}

fn emit<T>(tx: &TransitionSender<T>, phase: Phase, status: FetchStatus<T>) {
  // Ignore send errors - the activation may have been dropped
  let _ = tx.send(Transition { phase, status });
}
