//! Request/response over a fire-and-forget message bus.
//!
//! A caller publishes a request under a routing key and gets back a
//! [`Deferred`] that settles with exactly one outcome: the responder's
//! success data, its error or fail envelope, a timeout, or a publish failure.
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use sourced_reqres::bus::InMemoryQueue;
//! use sourced_reqres::{Config, ReqRes, RequestOptions};
//!
//! let reqres = ReqRes::start(Arc::new(InMemoryQueue::new()), Config::default()).unwrap();
//!
//! reqres
//!     .respond("v1.users.get", |request, sender| {
//!         let name = request.payload()["user"].as_str().unwrap_or("nobody").to_string();
//!         let _ = sender.success(&json!({ "hello": name }));
//!     })
//!     .unwrap();
//!
//! let reply = reqres
//!     .request("v1.users.get", &json!({ "user": "Pat" }), RequestOptions::default())
//!     .wait()
//!     .unwrap();
//! assert_eq!(reply, json!({ "hello": "Pat" }));
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod bus;
mod client;
mod config;
mod deferred;
pub mod envelope;
mod error;
#[cfg(feature = "emitter")]
mod lifecycle;
mod reqres;
mod responder;
mod tracker;
mod transport;

pub use client::{Client, RequestOptions};
pub use config::Config;
pub use deferred::{deferred, Completer, Deferred};
pub use envelope::{Codec, Envelope, ErrorResponse, FailResponse, Response, Status};
pub use error::{
    ConfigError, ProtocolError, RequestError, SendError, SetupError, TimeoutError, TrackerError,
};
#[cfg(feature = "emitter")]
pub use lifecycle::{Lifecycle, LifecycleEvents};
pub use reqres::ReqRes;
pub use responder::{respond, validate_routing_key, Registration, Request, Sender};
pub use tracker::CorrelationTracker;
pub use transport::{TransportHandle, TransportStats};

/// The caller's side of a request: settles with the success data or a rejection.
pub type Reply = Deferred<serde_json::Value, RequestError>;

/// Lock a mutex, recovering the data if another thread panicked while holding it.
///
/// Every critical section in this crate leaves its data consistent, so a
/// poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
