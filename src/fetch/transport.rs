//! HTTP transport seam and cancellation signal.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::TransportError;

/// Pass-through options for the HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RequestOptions {
  pub headers: Vec<(String, String)>,
  pub timeout: Option<Duration>,
}

impl RequestOptions {
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// Response as seen by the coordinator: a status code and a decoded body.
///
/// JSON bodies are parsed; anything else is carried as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Value,
}

impl HttpResponse {
  pub fn new(status: u16, body: Value) -> Self {
    Self { status, body }
  }
}

/// Sending half of a cancellation signal. Owned by an activation.
#[derive(Debug)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

impl CancelHandle {
  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }
}

/// Receiving half of a cancellation signal, handed to the transport.
#[derive(Debug, Clone)]
pub struct CancelSignal {
  rx: watch::Receiver<bool>,
}

impl CancelSignal {
  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once cancellation is requested or the handle is dropped.
  pub async fn cancelled(&mut self) {
    loop {
      if *self.rx.borrow_and_update() {
        return;
      }
      if self.rx.changed().await.is_err() {
        return;
      }
    }
  }
}

/// Create a linked cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
  let (tx, rx) = watch::channel(false);
  (CancelHandle { tx }, CancelSignal { rx })
}

/// HTTP GET capability used by the fetch coordinator.
#[async_trait]
pub trait HttpTransport: Send + Sync {
  /// Perform a GET. Implementations should stop early and return
  /// [`TransportError::Cancelled`] once `cancel` fires.
  async fn get(
    &self,
    url: &str,
    options: &RequestOptions,
    cancel: CancelSignal,
  ) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
  client: Client,
}

impl ReqwestTransport {
  pub fn new(client: Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn get(
    &self,
    url: &str,
    options: &RequestOptions,
    mut cancel: CancelSignal,
  ) -> Result<HttpResponse, TransportError> {
    let mut request = self.client.get(url);
    for (name, value) in &options.headers {
      request = request.header(name.as_str(), value.as_str());
    }
    if let Some(timeout) = options.timeout {
      request = request.timeout(timeout);
    }

    let exchange = async {
      let response = request.send().await.map_err(map_reqwest_error)?;
      let status = response.status().as_u16();
      let text = response.text().await.map_err(map_reqwest_error)?;
      Ok(HttpResponse::new(status, parse_body(&text)))
    };

    // Dropping the exchange future aborts the request
    tokio::select! {
      _ = cancel.cancelled() => Err(TransportError::Cancelled),
      result = exchange => result,
    }
  }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
  if err.is_timeout() {
    TransportError::Timeout
  } else if err.is_decode() || err.is_body() {
    TransportError::Malformed(err.to_string())
  } else {
    TransportError::Network(err.to_string())
  }
}

/// Decode a response body: JSON when it parses, otherwise the raw text.
pub fn parse_body(text: &str) -> Value {
  if text.trim().is_empty() {
    return Value::Null;
  }
  serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
pub(crate) mod mock {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Mutex};

  use tokio::sync::Semaphore;

  use super::*;

  /// Scripted transport that counts calls and can hold requests until released.
  pub struct MockTransport {
    reply: Mutex<Result<HttpResponse, TransportError>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, RequestOptions)>>,
    gate: Option<Arc<Semaphore>>,
    honor_cancel: bool,
  }

  impl MockTransport {
    pub fn ok(status: u16, body: Value) -> Self {
      Self::replying(Ok(HttpResponse::new(status, body)))
    }

    pub fn failing(err: TransportError) -> Self {
      Self::replying(Err(err))
    }

    fn replying(reply: Result<HttpResponse, TransportError>) -> Self {
      Self {
        reply: Mutex::new(reply),
        calls: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
        gate: None,
        honor_cancel: true,
      }
    }

    /// Hold every request until [`MockTransport::release`] is called.
    pub fn gated(mut self) -> Self {
      self.gate = Some(Arc::new(Semaphore::new(0)));
      self
    }

    /// Keep waiting on the gate even after cancellation.
    pub fn ignoring_cancel(mut self) -> Self {
      self.honor_cancel = false;
      self
    }

    pub fn release(&self) {
      if let Some(gate) = &self.gate {
        gate.add_permits(1);
      }
    }

    pub fn set_reply(&self, reply: Result<HttpResponse, TransportError>) {
      *self.reply.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<(String, RequestOptions)> {
      self.seen.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl HttpTransport for MockTransport {
    async fn get(
      &self,
      url: &str,
      options: &RequestOptions,
      mut cancel: CancelSignal,
    ) -> Result<HttpResponse, TransportError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .seen
        .lock()
        .unwrap()
        .push((url.to_string(), options.clone()));

      if let Some(gate) = &self.gate {
        if self.honor_cancel {
          tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            permit = gate.acquire() => permit.unwrap().forget(),
          }
        } else {
          gate.acquire().await.unwrap().forget();
        }
      }

      self.reply.lock().unwrap().clone()
    }
  }
}
