use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::{Client, RequestOptions};
use crate::config::Config;
use crate::error::{RequestError, SetupError};
#[cfg(feature = "emitter")]
use crate::lifecycle::{Lifecycle, LifecycleEvents};
use crate::responder::{respond, Registration, Request, Sender};
use crate::transport::TransportStats;
use crate::{bus::Bus, lock, Reply};

/// One bus, one reply address, any number of responders.
///
/// Owns the request client and every registration made through it.
/// Dropping it stops all of their consumers.
pub struct ReqRes<B: Bus> {
    bus: Arc<B>,
    config: Config,
    client: Client<B>,
    bindings: Mutex<HashMap<String, Registration>>,
    #[cfg(feature = "emitter")]
    events: LifecycleEvents,
}

impl<B: Bus + 'static> ReqRes<B> {
    pub fn start(bus: Arc<B>, config: Config) -> Result<Self, SetupError> {
        let client = Client::start(Arc::clone(&bus), config.clone())?;
        Ok(Self {
            bus,
            config,
            client,
            bindings: Mutex::new(HashMap::new()),
            #[cfg(feature = "emitter")]
            events: LifecycleEvents::new(),
        })
    }

    /// Like `start`, reporting the client and every later registration to
    /// `events` as `ready` or `error`.
    #[cfg(feature = "emitter")]
    pub fn start_with_events(
        bus: Arc<B>,
        config: Config,
        events: LifecycleEvents,
    ) -> Result<Self, SetupError> {
        let client = match Client::start(Arc::clone(&bus), config.clone()) {
            Ok(client) => client,
            Err(e) => {
                events.emit(Lifecycle::Error, e.to_string());
                return Err(e);
            }
        };
        events.emit(Lifecycle::Ready, client.reply_to());

        Ok(Self {
            bus,
            config,
            client,
            bindings: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Bind `handler` to `routing_key`.
    ///
    /// Responding again on a key that is already bound replaces its handler;
    /// the existing subscription keeps running.
    pub fn respond<F>(&self, routing_key: &str, handler: F) -> Result<(), SetupError>
    where
        F: Fn(Request, Sender) + Send + Sync + 'static,
    {
        let result = self.bind(routing_key, handler);

        #[cfg(feature = "emitter")]
        match &result {
            Ok(()) => self.events.emit(Lifecycle::Ready, routing_key),
            Err(e) => self.events.emit(Lifecycle::Error, e.to_string()),
        }
        if let Err(e) = &result {
            warn!(routing_key, error = %e, "responder setup failed");
        }

        result
    }

    fn bind<F>(&self, routing_key: &str, handler: F) -> Result<(), SetupError>
    where
        F: Fn(Request, Sender) + Send + Sync + 'static,
    {
        let mut bindings = lock(&self.bindings);
        if let Some(registration) = bindings.get(routing_key) {
            registration.replace_handler(handler);
            return Ok(());
        }

        let registration = respond(Arc::clone(&self.bus), routing_key, handler, &self.config)?;
        bindings.insert(routing_key.to_string(), registration);
        Ok(())
    }

    /// Stop the responder bound to `routing_key`.
    pub fn unbind(&self, routing_key: &str) -> Option<TransportStats> {
        let registration = lock(&self.bindings).remove(routing_key)?;
        let stats = registration.stop();
        info!(routing_key, handled = stats.handled, failed = stats.failed, "responder stopped");
        Some(stats)
    }

    /// Routing keys with a live responder, sorted.
    pub fn bindings(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.bindings).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn request<T: Serialize + ?Sized>(
        &self,
        routing_key: &str,
        payload: &T,
        options: RequestOptions,
    ) -> Reply {
        self.client.request(routing_key, payload, options)
    }

    pub fn request_with<T, F>(
        &self,
        routing_key: &str,
        payload: &T,
        options: RequestOptions,
        callback: F,
    ) where
        T: Serialize + ?Sized,
        F: FnOnce(Result<Value, RequestError>) + Send + 'static,
    {
        self.client.request_with(routing_key, payload, options, callback)
    }

    pub fn client(&self) -> &Client<B> {
        &self.client
    }

    #[cfg(feature = "emitter")]
    pub fn events(&self) -> &LifecycleEvents {
        &self.events
    }
}
