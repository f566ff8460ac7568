//! Observable result of one get-or-fetch activation.
//!
//! An [`Activation<T>`] starts in the loading state and receives at most one
//! terminal snapshot from the coordinator.
//!
//! # Example
//!
//! ```ignore
//! let mut activation = coordinator.run::<Vec<Product>>("products", url, &options, &request);
//! assert!(activation.status().loading);
//!
//! // In an event loop tick
//! if activation.poll() {
//!     render(activation.status());
//! }
//!
//! // Or just wait
//! let status = activation.settled().await;
//! ```

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;

use super::transport::CancelHandle;
use crate::cache::CacheSource;
use crate::error::FetchError;

/// Lifecycle phase of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Created, request target not resolved yet
  Idle,
  /// Looking for a valid cache record
  CheckingCache,
  /// Network request in flight
  Fetching,
  /// Data came from the cache; no request was made
  ServedFromCache,
  /// Network request succeeded
  Succeeded,
  /// Network request or URL handling failed
  Failed,
  /// Torn down before reaching another terminal phase
  Cancelled,
}

impl Phase {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      Phase::ServedFromCache | Phase::Succeeded | Phase::Failed | Phase::Cancelled
    )
  }
}

/// Snapshot exposed to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchStatus<T> {
  pub data: Option<T>,
  pub loading: bool,
  pub error: Option<FetchError>,
  /// Where `data` came from, once there is any
  pub source: Option<CacheSource>,
}

impl<T> FetchStatus<T> {
  pub fn loading() -> Self {
    Self {
      data: None,
      loading: true,
      error: None,
      source: None,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data: Some(data),
      loading: false,
      error: None,
      source: Some(CacheSource::Cache),
    }
  }

  pub fn from_network(data: T) -> Self {
    Self {
      data: Some(data),
      loading: false,
      error: None,
      source: Some(CacheSource::Network),
    }
  }

  pub fn failed(error: FetchError) -> Self {
    Self {
      data: None,
      loading: false,
      error: Some(error),
      source: None,
    }
  }
}

/// A phase change paired with the snapshot it produced.
#[derive(Debug)]
pub(crate) struct Transition<T> {
  pub phase: Phase,
  pub status: FetchStatus<T>,
}

pub(crate) type TransitionSender<T> = mpsc::UnboundedSender<Transition<T>>;

/// Handle to a running get-or-fetch.
///
/// Dropping the activation deactivates it.
pub struct Activation<T> {
  status: FetchStatus<T>,
  phase: Phase,
  receiver: Option<mpsc::UnboundedReceiver<Transition<T>>>,
  cancel: Option<CancelHandle>,
}

impl<T> Activation<T> {
  /// New idle activation in the loading state, plus the sender for its transitions.
  pub(crate) fn start() -> (Self, TransitionSender<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let activation = Self {
      status: FetchStatus::loading(),
      phase: Phase::Idle,
      receiver: Some(rx),
      cancel: None,
    };
    (activation, tx)
  }

  pub(crate) fn checking_cache(&mut self) {
    self.phase = Phase::CheckingCache;
  }

  /// Bind the in-flight request's cancel handle to this activation.
  pub(crate) fn fetching(&mut self, cancel: CancelHandle) {
    self.phase = Phase::Fetching;
    self.cancel = Some(cancel);
  }

  /// Latest snapshot.
  pub fn status(&self) -> &FetchStatus<T> {
    &self.status
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn is_loading(&self) -> bool {
    self.status.loading
  }

  pub fn data(&self) -> Option<&T> {
    self.status.data.as_ref()
  }

  pub fn error(&self) -> Option<&FetchError> {
    self.status.error.as_ref()
  }

  /// Apply every transition that has already arrived.
  ///
  /// Returns `true` if the snapshot changed. Call this from an event loop tick.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    loop {
      let receiver = match &mut self.receiver {
        Some(rx) => rx,
        None => return changed,
      };

      match receiver.try_recv() {
        Ok(transition) => {
          self.apply(transition);
          changed = true;
        }
        Err(mpsc::error::TryRecvError::Empty) => return changed,
        Err(mpsc::error::TryRecvError::Disconnected) => {
          self.closed();
          return changed;
        }
      }
    }
  }

  /// Wait for the next transition.
  ///
  /// Returns `false` once no more transitions can arrive.
  pub async fn changed(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    let next = receiver.recv().await;
    match next {
      Some(transition) => {
        self.apply(transition);
        true
      }
      None => {
        self.closed();
        false
      }
    }
  }

  /// Wait until the activation reaches a terminal phase and return its snapshot.
  pub async fn settled(&mut self) -> &FetchStatus<T> {
    while !self.phase.is_terminal() {
      if !self.changed().await {
        break;
      }
    }
    &self.status
  }

  /// Cancel the in-flight request, if any.
  ///
  /// No transition is observed afterwards and the request will not write to
  /// the cache. The last snapshot stays as it was.
  pub fn deactivate(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel.cancel();
    }
    self.receiver = None;
    if !self.phase.is_terminal() {
      self.phase = Phase::Cancelled;
    }
  }

  fn apply(&mut self, transition: Transition<T>) {
    self.phase = transition.phase;
    self.status = transition.status;
    if self.phase.is_terminal() {
      self.cancel = None;
    }
  }

  /// The sender went away. Without a terminal transition that means cancellation.
  fn closed(&mut self) {
    self.receiver = None;
    if !self.phase.is_terminal() {
      self.phase = Phase::Cancelled;
    }
  }
}

impl<T: Clone> Activation<T> {
  /// Every snapshot, starting with the current one.
  ///
  /// The stream ends after the terminal snapshot. Dropping it deactivates.
  pub fn into_stream(self) -> impl Stream<Item = FetchStatus<T>> {
    let first = self.status.clone();
    stream::once(async move { first }).chain(stream::unfold(self, |mut activation| async move {
      if activation.changed().await {
        let status = activation.status.clone();
        Some((status, activation))
      } else {
        None
      }
    }))
  }
}

impl<T> Drop for Activation<T> {
  fn drop(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel.cancel();
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Activation<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Activation")
      .field("phase", &self.phase)
      .field("status", &self.status)
      .finish_non_exhaustive()
  }
}
