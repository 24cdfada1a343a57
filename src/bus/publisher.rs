//! Core publisher types for the message bus.

use thiserror::Error;
use uuid::Uuid;

/// Header carrying the token that links a reply to its request.
pub const CORRELATION_ID: &str = "correlationId";

/// Header carrying the address a responder publishes its reply to.
pub const REPLY_TO: &str = "replyTo";

/// A message travelling over the bus.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Unique identifier for this delivery (used for ack/nack)
    pub id: String,
    /// Routing key the message was published under (e.g., "v1.users.get")
    pub routing_key: String,
    /// Serialized payload (JSON for requests and replies)
    pub payload: Vec<u8>,
    /// Transport headers (correlation id, reply address, ...)
    pub headers: Vec<(String, String)>,
}

impl Message {
    /// Create a new message with a generated delivery id.
    pub fn new(routing_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            routing_key: routing_key.into(),
            payload,
            headers: Vec::new(),
        }
    }

    /// Create a message with a string payload.
    pub fn with_string_payload(routing_key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(routing_key, payload.into().into_bytes())
    }

    /// Add a header. A header set twice keeps both; `header()` returns the last.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Look up a header by name.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The `correlationId` header, if present.
    pub fn correlation_id(&self) -> Option<&str> {
        self.header(CORRELATION_ID)
    }

    /// The `replyTo` header, if present.
    pub fn reply_to(&self) -> Option<&str> {
        self.header(REPLY_TO)
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Broker-level failure while publishing, binding or polling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection to the bus failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The bus refused to bind a consumer to the routing key
    #[error("bind rejected for {routing_key}: {reason}")]
    BindRejected { routing_key: String, reason: String },
    /// The bus rejected the message
    #[error("message rejected: {0}")]
    Rejected(String),
    /// The bus has been closed
    #[error("bus closed")]
    Closed,
}

/// Trait for publishing messages to a routing key.
///
/// Delivery is point-to-point: each message published under a routing key is
/// consumed by exactly one subscriber polling that key (competing consumers).
/// Redelivery may still hand the same message out more than once.
pub trait Publisher: Send + Sync {
    /// Publish a single message under its routing key.
    fn publish(&self, message: Message) -> Result<(), TransportError>;

    /// Publish multiple messages.
    ///
    /// Default implementation publishes sequentially and stops at the first failure.
    fn publish_batch(&self, messages: Vec<Message>) -> Result<(), TransportError> {
        for message in messages {
            self.publish(message)?;
        }
        Ok(())
    }
}
