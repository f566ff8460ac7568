//! Long-lived binding that re-runs a fetch when its inputs change.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::activation::{Activation, FetchStatus};
use super::coordinator::FetchCoordinator;
use super::transport::{HttpTransport, RequestOptions};
use crate::cache::{CacheOptions, KeyValueStore};

/// Which input changes start a new activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reactivation {
  /// Only a different URL re-runs. Cache key, options and request
  /// changes are picked up on the next URL change.
  #[default]
  UrlOnly,
  /// Any input change re-runs.
  AllInputs,
}

/// Inputs of one activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationKey {
  pub cache_key: String,
  pub url: String,
  pub options: CacheOptions,
  pub request: RequestOptions,
}

impl ActivationKey {
  pub fn new(
    cache_key: impl Into<String>,
    url: impl Into<String>,
    options: CacheOptions,
    request: RequestOptions,
  ) -> Self {
    Self {
      cache_key: cache_key.into(),
      url: url.into(),
      options,
      request,
    }
  }

  /// Whether moving from `self` to `next` starts a new activation under `policy`.
  pub fn triggers(&self, next: &ActivationKey, policy: Reactivation) -> bool {
    match policy {
      Reactivation::UrlOnly => self.url != next.url,
      Reactivation::AllInputs => self != next,
    }
  }
}

/// Holds the current activation for a caller and swaps it when inputs change.
///
/// Replacing an activation deactivates the previous one first, so a
/// superseded request never emits or writes.
pub struct FetchBinding<S: KeyValueStore, H: HttpTransport, T> {
  coordinator: Arc<FetchCoordinator<S, H>>,
  policy: Reactivation,
  current: Option<(ActivationKey, Activation<T>)>,
}

impl<S, H, T> FetchBinding<S, H, T>
where
  S: KeyValueStore + 'static,
  H: HttpTransport + 'static,
  T: DeserializeOwned + Send + 'static,
{
  pub fn new(coordinator: Arc<FetchCoordinator<S, H>>, policy: Reactivation) -> Self {
    Self {
      coordinator,
      policy,
      current: None,
    }
  }

  pub fn policy(&self) -> Reactivation {
    self.policy
  }

  /// Feed the latest inputs. Returns `true` if a new activation was started.
  pub fn update(&mut self, key: ActivationKey) -> bool {
    if let Some((current, _)) = &self.current {
      if !current.triggers(&key, self.policy) {
        return false;
      }
    }

    self.detach();
    let activation = self
      .coordinator
      .run(&key.cache_key, &key.url, &key.options, &key.request);
    self.current = Some((key, activation));
    true
  }

  /// Inputs of the running activation.
  pub fn key(&self) -> Option<&ActivationKey> {
    self.current.as_ref().map(|(key, _)| key)
  }

  pub fn activation(&self) -> Option<&Activation<T>> {
    self.current.as_ref().map(|(_, activation)| activation)
  }

  pub fn activation_mut(&mut self) -> Option<&mut Activation<T>> {
    self.current.as_mut().map(|(_, activation)| activation)
  }

  /// Latest snapshot, or `None` before the first update.
  pub fn status(&self) -> Option<&FetchStatus<T>> {
    self.activation().map(Activation::status)
  }

  /// Deactivate and forget the current activation.
  pub fn detach(&mut self) {
    if let Some((_, mut activation)) = self.current.take() {
      activation.deactivate();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::cache::{CacheStore, ManualClock, MemoryStorage};
  use crate::fetch::activation::Phase;
  use crate::fetch::transport::mock::MockTransport;
  use serde_json::json;

  const URL_A: &str = "https://myurl.com/a";
  const URL_B: &str = "https://myurl.com/b";

  fn binding(
    transport: MockTransport,
    policy: Reactivation,
  ) -> (
    FetchBinding<MemoryStorage, MockTransport, String>,
    Arc<FetchCoordinator<MemoryStorage, MockTransport>>,
  ) {
    let store = CacheStore::new(MemoryStorage::new()).with_clock(Arc::new(ManualClock::new(0)));
    let coordinator = Arc::new(FetchCoordinator::new(store, transport));
    (FetchBinding::new(Arc::clone(&coordinator), policy), coordinator)
  }

  fn key(cache_key: &str, url: &str, options: CacheOptions) -> ActivationKey {
    ActivationKey::new(cache_key, url, options, RequestOptions::default())
  }

  #[test]
  fn test_trigger_policies() {
    let base = key("k", URL_A, CacheOptions::default());
    let other_key = key("k2", URL_A, CacheOptions::default());
    let other_url = key("k", URL_B, CacheOptions::default());

    assert!(!base.triggers(&base, Reactivation::UrlOnly));
    assert!(!base.triggers(&other_key, Reactivation::UrlOnly));
    assert!(base.triggers(&other_url, Reactivation::UrlOnly));

    assert!(!base.triggers(&base, Reactivation::AllInputs));
    assert!(base.triggers(&other_key, Reactivation::AllInputs));
    assert!(base.triggers(&other_url, Reactivation::AllInputs));
  }

  #[tokio::test]
  async fn test_url_only_ignores_key_and_config_changes() {
    let (mut binding, coordinator) =
      binding(MockTransport::ok(200, json!("yay")), Reactivation::UrlOnly);

    assert!(binding.update(key("k", URL_A, CacheOptions::bypass())));
    binding.activation_mut().unwrap().settled().await;

    assert!(!binding.update(key("k2", URL_A, CacheOptions::bypass())));
    assert!(!binding.update(key("k", URL_A, CacheOptions::bypass().with_invalidator("x"))));
    assert_eq!(binding.key().unwrap().cache_key, "k");
    assert_eq!(coordinator.transport().calls(), 1);

    assert!(binding.update(key("k2", URL_B, CacheOptions::bypass())));
    binding.activation_mut().unwrap().settled().await;
    assert_eq!(binding.key().unwrap().cache_key, "k2");
    assert_eq!(coordinator.transport().calls(), 2);
  }

  #[tokio::test]
  async fn test_all_inputs_reruns_on_config_change() {
    let (mut binding, coordinator) =
      binding(MockTransport::ok(200, json!("yay")), Reactivation::AllInputs);

    assert!(binding.update(key("k", URL_A, CacheOptions::bypass())));
    binding.activation_mut().unwrap().settled().await;

    assert!(!binding.update(key("k", URL_A, CacheOptions::bypass())));
    assert!(binding.update(key("k", URL_A, CacheOptions::bypass().with_invalidator("x"))));
    binding.activation_mut().unwrap().settled().await;
    assert!(binding.update(key("k2", URL_A, CacheOptions::bypass().with_invalidator("x"))));
    binding.activation_mut().unwrap().settled().await;

    assert_eq!(coordinator.transport().calls(), 3);
  }

  #[tokio::test]
  async fn test_url_change_cancels_previous_activation() {
    let (mut binding, coordinator) =
      binding(MockTransport::ok(200, json!("late")).gated(), Reactivation::UrlOnly);

    binding.update(key("k", URL_A, CacheOptions::default()));
    tokio::time::sleep(Duration::from_millis(10)).await;

    binding.update(key("k", URL_B, CacheOptions::default()));
    assert!(binding.status().unwrap().loading);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(coordinator.transport().calls(), 2);
    coordinator.transport().release();

    let status = binding.activation_mut().unwrap().settled().await.clone();
    assert_eq!(status.data.as_deref(), Some("late"));
    assert_eq!(binding.activation().unwrap().phase(), Phase::Succeeded);

    // Only the second URL was cached
    let store = coordinator.store();
    assert_eq!(store.get("k", "/a", coordinator.defaults()), None);
    assert_eq!(store.get("k", "/b", coordinator.defaults()), Some(json!("late")));
  }

  #[tokio::test]
  async fn test_detach_deactivates() {
    let (mut binding, coordinator) =
      binding(MockTransport::ok(200, json!("late")).gated(), Reactivation::UrlOnly);

    binding.update(key("k", URL_A, CacheOptions::default()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    binding.detach();
    coordinator.transport().release();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(binding.status().is_none());
    assert!(coordinator.store().storage().keys().unwrap().is_empty());

    // A fresh update starts again even with the same inputs
    assert!(binding.update(key("k", URL_A, CacheOptions::default())));
  }
}
