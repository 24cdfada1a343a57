//! In-memory queue for testing and single-process scenarios.
//!
//! This module provides a thread-safe in-memory bus that implements
//! both `Publisher` and `Subscriber`, useful for:
//! - Unit and integration testing without a broker
//! - Single-process applications
//! - Development and prototyping

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{Message, Publisher, Subscriber, TransportError};
use crate::lock;

/// In-memory bus with one FIFO queue per routing key.
///
/// Features:
/// - Thread-safe (clones share the same queues)
/// - Point-to-point: each message is handed to exactly one `poll` call
/// - Every published message is also kept in an append-only log for inspection
/// - Failure injection: `close()` and `fail_publish()` simulate broker errors
///
/// ## Example
///
/// ```
/// use sourced_reqres::bus::{InMemoryQueue, Message, Publisher, Subscriber};
///
/// let queue = InMemoryQueue::new();
///
/// queue.publish(Message::with_string_payload("v1.users.get", r#"{"id":"123"}"#)).unwrap();
///
/// let message = queue.poll("v1.users.get", 100).unwrap();
/// assert!(message.is_some());
/// assert_eq!(message.unwrap().payload_str(), Some(r#"{"id":"123"}"#));
///
/// // Consumed: nothing left on that routing key
/// assert!(queue.poll("v1.users.get", 10).unwrap().is_none());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Undelivered messages per routing key
    queues: Mutex<HashMap<String, VecDeque<Message>>>,
    /// Signalled whenever a message is enqueued or the bus closes
    arrived: Condvar,
    /// Every message ever published, in order
    log: Mutex<Vec<Message>>,
    /// Routing keys with an established subscription
    bound: Mutex<HashSet<String>>,
    /// Routing keys whose publishes are rejected
    failing: Mutex<HashSet<String>>,
    /// Acknowledged message IDs
    acked: Mutex<Vec<String>>,
    /// Rejected message IDs with the reason given
    nacked: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl InMemoryQueue {
    /// Create a new in-memory queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all messages ever published, in order.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner.log).clone()
    }

    /// Get all messages ever published under a routing key.
    pub fn sent_to(&self, routing_key: &str) -> Vec<Message> {
        lock(&self.inner.log)
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Number of undelivered messages waiting under a routing key.
    pub fn len(&self, routing_key: &str) -> usize {
        lock(&self.inner.queues)
            .get(routing_key)
            .map_or(0, VecDeque::len)
    }

    /// Check whether a routing key has undelivered messages.
    pub fn is_empty(&self, routing_key: &str) -> bool {
        self.len(routing_key) == 0
    }

    /// Check whether a subscription has been bound on a routing key.
    pub fn is_bound(&self, routing_key: &str) -> bool {
        lock(&self.inner.bound).contains(routing_key)
    }

    /// Get acknowledged message IDs.
    pub fn acknowledged(&self) -> Vec<String> {
        lock(&self.inner.acked).clone()
    }

    /// Get rejected message IDs with their reasons.
    pub fn rejected(&self) -> Vec<(String, String)> {
        lock(&self.inner.nacked).clone()
    }

    /// Make every subsequent publish under `routing_key` fail.
    pub fn fail_publish(&self, routing_key: &str) {
        lock(&self.inner.failing).insert(routing_key.to_string());
    }

    /// Close the bus: publishes, binds and polls fail with `TransportError::Closed`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.arrived.notify_all();
    }

    /// Check whether the bus has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Clear all queues and logs (useful for test cleanup).
    pub fn clear(&self) {
        lock(&self.inner.queues).clear();
        lock(&self.inner.log).clear();
        lock(&self.inner.acked).clear();
        lock(&self.inner.nacked).clear();
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Publisher for InMemoryQueue {
    fn publish(&self, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;

        if lock(&self.inner.failing).contains(&message.routing_key) {
            return Err(TransportError::Rejected(format!(
                "publish to {} refused",
                message.routing_key
            )));
        }

        lock(&self.inner.log).push(message.clone());
        lock(&self.inner.queues)
            .entry(message.routing_key.clone())
            .or_default()
            .push_back(message);
        self.inner.arrived.notify_all();
        Ok(())
    }
}

impl Subscriber for InMemoryQueue {
    fn bind(&self, routing_key: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        lock(&self.inner.bound).insert(routing_key.to_string());
        Ok(())
    }

    fn poll(&self, routing_key: &str, timeout_ms: u64) -> Result<Option<Message>, TransportError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut queues = lock(&self.inner.queues);

        loop {
            self.ensure_open()?;

            if let Some(message) = queues.get_mut(routing_key).and_then(VecDeque::pop_front) {
                return Ok(Some(message));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            queues = match self.inner.arrived.wait_timeout(queues, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn ack(&self, _routing_key: &str, message_id: &str) -> Result<(), TransportError> {
        lock(&self.inner.acked).push(message_id.to_string());
        Ok(())
    }

    fn nack(
        &self,
        _routing_key: &str,
        message_id: &str,
        reason: &str,
    ) -> Result<(), TransportError> {
        // No redelivery in memory; the message is dead-lettered
        lock(&self.inner.nacked).push((message_id.to_string(), reason.to_string()));
        Ok(())
    }
}
