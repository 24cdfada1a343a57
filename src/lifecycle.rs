//! `ready` / `error` notifications for registrations and reply subscriptions.
//!
//! The `Result` returned by `respond` and `Client::start` is the primary
//! signal. `LifecycleEvents` mirrors it for code that prefers listeners,
//! e.g. a supervisor watching many registrations.
//!
//! ```ignore
//! let events = LifecycleEvents::new();
//! events.on_error(|detail| eprintln!("setup failed: {detail}"));
//! events.on_ready(|routing_key| println!("{routing_key} is ready"));
//!
//! let reqres = ReqRes::start_with_events(bus, Config::default(), events)?;
//! ```
//!
//! Listeners run on background threads; emission does not wait for them.

use std::sync::Mutex;

use event_emitter_rs::EventEmitter;

use crate::lock;

/// The two lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Setup completed; carries the routing key or reply address.
    Ready,
    /// Setup failed; carries the error description.
    Error,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Ready => "ready",
            Lifecycle::Error => "error",
        }
    }
}

/// Listener registry for lifecycle events.
pub struct LifecycleEvents {
    emitter: Mutex<EventEmitter>,
}

impl Default for LifecycleEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleEvents {
    pub fn new() -> Self {
        Self {
            emitter: Mutex::new(EventEmitter::new()),
        }
    }

    /// Listen for `ready`. Returns the listener id.
    pub fn on_ready<F>(&self, listener: F) -> String
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on(Lifecycle::Ready, listener)
    }

    /// Listen for `error`. Returns the listener id.
    pub fn on_error<F>(&self, listener: F) -> String
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on(Lifecycle::Error, listener)
    }

    /// Listen for either event.
    pub fn on<F>(&self, event: Lifecycle, listener: F) -> String
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        lock(&self.emitter).on(event.as_str(), listener)
    }

    /// Remove a listener by id. Returns `false` if no such listener exists.
    pub fn remove_listener(&self, id: &str) -> bool {
        lock(&self.emitter).remove_listener(id).is_some()
    }

    pub(crate) fn emit(&self, event: Lifecycle, detail: impl Into<String>) {
        let detail: String = detail.into();
        lock(&self.emitter).emit(event.as_str(), detail);
    }
}
