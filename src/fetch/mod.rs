//! Get-or-fetch over the persisted cache.
//!
//! A [`FetchCoordinator`] turns `(cache_key, url, options)` into an
//! [`Activation`]: loading first, then exactly one of a cache hit, a network
//! success, or a failure, unless it is deactivated before that.
//! [`FetchBinding`] keeps one activation alive per caller and decides when
//! new inputs start another.

mod activation;
mod binding;
mod coordinator;
mod target;
mod transport;

pub use activation::{Activation, FetchStatus, Phase};
pub use binding::{ActivationKey, FetchBinding, Reactivation};
pub use coordinator::{FetchCoordinator, MAX_SUCCESS_STATUS};
pub use target::RequestTarget;
pub use transport::{
  cancel_pair, parse_body, CancelHandle, CancelSignal, HttpResponse, HttpTransport,
  ReqwestTransport, RequestOptions,
};
