//! Core subscriber trait for the message bus.

use super::publisher::{Message, TransportError};

/// Trait for consuming messages published under a routing key.
///
/// This is a pull-based interface: consumers call `bind` once, then `poll`
/// in a loop (see `transport::consume`).
pub trait Subscriber: Send + Sync {
    /// Establish a subscription on a routing key.
    ///
    /// Brokers that declare queues or bindings do it here; a rejection is a
    /// setup failure rather than a per-message one.
    fn bind(&self, _routing_key: &str) -> Result<(), TransportError> {
        Ok(())
    }

    /// Poll for the next message on a routing key, blocking until one is
    /// available or the timeout expires.
    fn poll(&self, routing_key: &str, timeout_ms: u64) -> Result<Option<Message>, TransportError>;

    /// Acknowledge that a message has been processed.
    fn ack(&self, routing_key: &str, message_id: &str) -> Result<(), TransportError>;

    /// Reject a message (will be redelivered or dead-lettered, depending on the broker).
    fn nack(&self, routing_key: &str, message_id: &str, reason: &str) -> Result<(), TransportError>;
}
