//! Responder registration - binds a routing key to a handler.
//!
//! Each inbound request is handed to the handler together with a `Sender`.
//! The handler answers through the sender exactly once:
//!
//! ```ignore
//! let registration = respond(bus, "v1.users.get", |request, sender| {
//!     match lookup(request.payload()) {
//!         Ok(users) => { let _ = sender.success(&users); }
//!         Err(LookupError::BadInput(why)) => { let _ = sender.fail(&why); }
//!         Err(e) => { let _ = sender.error("lookup failed", &e, Some(500)); }
//!     }
//! }, &Config::default())?;
//! ```
//!
//! A second call on the same sender returns `SendError::AlreadySent`. A
//! sender dropped without any call (including when the handler panics)
//! replies with an error envelope so the caller does not wait for its
//! timeout.

use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bus::{Bus, Message, Publisher, CORRELATION_ID, REPLY_TO};
use crate::config::Config;
use crate::envelope::{Codec, Envelope};
use crate::error::{ProtocolError, SendError, SetupError};
use crate::transport::{consume, TransportHandle, TransportStats};

/// Code sent when a request payload cannot be decoded.
const MALFORMED_REQUEST_CODE: u32 = 400;

/// A request handler. Receives the decoded request and the reply capability.
pub type Handler = dyn Fn(Request, Sender) + Send + Sync;

type HandlerSlot = Arc<RwLock<Arc<Handler>>>;

/// A decoded inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    routing_key: String,
    correlation_id: String,
    payload: Value,
    headers: Vec<(String, String)>,
}

impl Request {
    /// The raw JSON payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Deserialize the payload into a typed struct.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Look up a transport header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Error)]
#[error("handler for {routing_key} returned without replying")]
struct NoReply {
    routing_key: String,
}

/// The reply capability handed to a handler alongside each request.
///
/// Exactly one of `success`, `error` or `fail` should be called.
pub struct Sender {
    publisher: Arc<dyn Publisher>,
    codec: Codec,
    routing_key: String,
    reply_to: String,
    correlation_id: String,
    sent: AtomicBool,
}

impl Sender {
    fn new(
        publisher: Arc<dyn Publisher>,
        codec: Codec,
        routing_key: &str,
        reply_to: &str,
        correlation_id: &str,
    ) -> Self {
        Self {
            publisher,
            codec,
            routing_key: routing_key.to_string(),
            reply_to: reply_to.to_string(),
            correlation_id: correlation_id.to_string(),
            sent: AtomicBool::new(false),
        }
    }

    /// Reply with a success envelope carrying `data`.
    pub fn success<T: Serialize + ?Sized>(&self, data: &T) -> Result<(), SendError> {
        let envelope = self.codec.success(&self.correlation_id, data)?;
        self.send(envelope)
    }

    /// Reply with an error envelope.
    ///
    /// `code` falls back to the configured default error code when `None`.
    pub fn error<E: Error + ?Sized>(
        &self,
        message: impl Into<String>,
        error: &E,
        code: Option<u32>,
    ) -> Result<(), SendError> {
        let envelope = self.codec.error(&self.correlation_id, message, error, code);
        self.send(envelope)
    }

    /// Reply with a fail envelope carrying `data`.
    pub fn fail<T: Serialize + ?Sized>(&self, data: &T) -> Result<(), SendError> {
        let envelope = self.codec.fail(&self.correlation_id, data)?;
        self.send(envelope)
    }

    /// Whether a reply has already been sent.
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        if self.sent.swap(true, Ordering::SeqCst) {
            error!(
                routing_key = %self.routing_key,
                correlation_id = %self.correlation_id,
                status = %envelope.status(),
                "reply already sent; ignoring second reply"
            );
            return Err(SendError::AlreadySent {
                correlation_id: self.correlation_id.clone(),
            });
        }
        self.publish(&envelope)
    }

    fn publish(&self, envelope: &Envelope) -> Result<(), SendError> {
        let payload = self.codec.encode(envelope)?;
        let message = Message::new(&self.reply_to, payload)
            .with_header(CORRELATION_ID, &self.correlation_id);

        match self.publisher.publish(message) {
            Ok(()) => {
                debug!(
                    routing_key = %self.routing_key,
                    correlation_id = %self.correlation_id,
                    status = %envelope.status(),
                    reply_to = %self.reply_to,
                    "reply sent"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    routing_key = %self.routing_key,
                    correlation_id = %self.correlation_id,
                    error = %e,
                    "failed to publish reply"
                );
                Err(e.into())
            }
        }
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(
            routing_key = %self.routing_key,
            correlation_id = %self.correlation_id,
            "responder dropped without replying"
        );
        let cause = NoReply {
            routing_key: self.routing_key.clone(),
        };
        let envelope = self.codec.error(
            &self.correlation_id,
            "responder dropped without replying",
            &cause,
            None,
        );
        let _ = self.publish(&envelope);
    }
}

/// A live binding of a handler to a routing key.
///
/// Dropping the registration stops its consumer.
pub struct Registration {
    handler: HandlerSlot,
    handle: TransportHandle,
}

impl Registration {
    pub fn routing_key(&self) -> &str {
        self.handle.routing_key()
    }

    /// Swap the handler without restarting the consumer.
    pub fn replace_handler<F>(&self, handler: F)
    where
        F: Fn(Request, Sender) + Send + Sync + 'static,
    {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(handler);
        debug!(routing_key = %self.routing_key(), "handler replaced");
    }

    /// Stop consuming and return the consumer's statistics.
    pub fn stop(self) -> TransportStats {
        self.handle.stop()
    }
}

/// Check a routing key: dot-separated, non-empty segments of
/// ASCII letters, digits, `-` and `_`.
pub fn validate_routing_key(routing_key: &str) -> Result<(), SetupError> {
    let invalid = |reason| SetupError::InvalidRoutingKey {
        routing_key: routing_key.to_string(),
        reason,
    };

    if routing_key.is_empty() {
        return Err(invalid("routing key is empty"));
    }
    for segment in routing_key.split('.') {
        if segment.is_empty() {
            return Err(invalid("routing key has an empty segment"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("routing key contains an unsupported character"));
        }
    }
    Ok(())
}

/// Bind `handler` to `routing_key`.
///
/// Returns once the subscription is established (the `ready` point): requests
/// published after this returns are guaranteed to reach the handler. A
/// malformed routing key or a bind rejected by the bus is reported as
/// `SetupError`.
///
/// Each call starts its own consumer. Calling `respond` twice for the same key
/// on one bus leaves both handlers competing for requests. `ReqRes::respond`
/// keeps one binding per key and swaps the handler instead; standalone
/// registrations should use `Registration::replace_handler`.
pub fn respond<B, F>(
    bus: Arc<B>,
    routing_key: &str,
    handler: F,
    config: &Config,
) -> Result<Registration, SetupError>
where
    B: Bus + 'static,
    F: Fn(Request, Sender) + Send + Sync + 'static,
{
    validate_routing_key(routing_key)?;

    let handler: HandlerSlot = Arc::new(RwLock::new(Arc::new(handler)));
    let slot = Arc::clone(&handler);
    let publisher: Arc<dyn Publisher> = bus.clone();
    let codec = Codec::new(config.default_error_code);

    let handle = consume(bus, routing_key, config.poll_interval(), move |message| {
        dispatch(message, &publisher, codec, &slot)
    })?;

    info!(routing_key, "responder ready");
    Ok(Registration { handler, handle })
}

fn dispatch(
    message: &Message,
    publisher: &Arc<dyn Publisher>,
    codec: Codec,
    slot: &HandlerSlot,
) -> Result<(), String> {
    let correlation_id = message
        .correlation_id()
        .ok_or(ProtocolError::MissingHeader(CORRELATION_ID))
        .map_err(|e| e.to_string())?;
    let reply_to = message
        .reply_to()
        .ok_or(ProtocolError::MissingHeader(REPLY_TO))
        .map_err(|e| e.to_string())?;

    let sender = Sender::new(
        Arc::clone(publisher),
        codec,
        &message.routing_key,
        reply_to,
        correlation_id,
    );

    let payload = match codec.decode_request(&message.payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(
                routing_key = %message.routing_key,
                correlation_id,
                error = %e,
                "malformed request payload"
            );
            let _ = sender.error("malformed request payload", &e, Some(MALFORMED_REQUEST_CODE));
            return Err(e.to_string());
        }
    };

    let request = Request {
        routing_key: message.routing_key.clone(),
        correlation_id: correlation_id.to_string(),
        payload,
        headers: message.headers.clone(),
    };

    let handler = Arc::clone(&*slot.read().unwrap_or_else(PoisonError::into_inner));
    debug!(routing_key = %message.routing_key, correlation_id, "dispatching request");

    panic::catch_unwind(AssertUnwindSafe(|| handler(request, sender))).map_err(|_| {
        error!(
            routing_key = %message.routing_key,
            correlation_id,
            "handler panicked"
        );
        "handler panicked".to_string()
    })
}
