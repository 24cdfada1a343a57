//! Combined trait for bidirectional bus communication.

use super::publisher::Publisher;
use super::subscriber::Subscriber;

/// A bus that can both publish and consume messages.
///
/// Request clients and responders need both directions: a client publishes
/// requests and consumes replies, a responder consumes requests and publishes
/// replies.
pub trait Bus: Publisher + Subscriber {}

// Blanket implementation
impl<T: Publisher + Subscriber> Bus for T {}
