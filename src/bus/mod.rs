//! Message bus - the transport collaborator under request/response.
//!
//! This module provides the traits a broker client implements, and an
//! in-memory implementation for tests and single-process use.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Client / Responder (this crate)              │
//! │  - request(): publish + await reply                         │
//! │  - respond(): consume requests, publish replies             │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Publisher + Subscriber Traits                │
//! │  Publisher: publish(message) / publish_batch(messages)      │
//! │  Subscriber: bind(key) / poll(key, timeout) / ack / nack    │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────────────┐
//! │InMemoryQueue│    │  RabbitMQ   │    │        NATS         │
//! │ (included)  │    │ (external)  │    │    (external)       │
//! └─────────────┘    └─────────────┘    └─────────────────────┘
//! ```
//!
//! Requests and replies are both plain `Message`s; the `correlationId` and
//! `replyTo` headers are what turn two one-way messages into a round trip.

mod bus;
mod in_memory_queue;
mod publisher;
mod subscriber;

pub use bus::Bus;
pub use in_memory_queue::InMemoryQueue;
pub use publisher::{Message, Publisher, TransportError, CORRELATION_ID, REPLY_TO};
pub use subscriber::Subscriber;
