//! Background consumer threads driving a `Subscriber`.
//!
//! Responders and the reply side of the correlation tracker both sit on one
//! of these: bind a routing key, then poll it until stopped.

use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::bus::{Message, Subscriber, TransportError};

/// Floor for the poll timeout so an idle consumer always blocks.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Statistics from a consumer thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransportStats {
    /// Number of messages successfully handled (acked).
    pub handled: usize,
    /// Number of messages that failed handling (nacked).
    pub failed: usize,
    /// Number of poll cycles completed.
    pub polls: usize,
}

/// Handle to a background consumer thread. Drop or call `stop()` to shut down.
pub struct TransportHandle {
    routing_key: String,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<TransportStats>>,
}

impl TransportHandle {
    /// The routing key this consumer is bound to.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Stop the consumer and wait for it to finish. Returns stats.
    pub fn stop(mut self) -> TransportStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            TransportStats::default()
        }
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Bind `routing_key` and spawn a thread feeding each message to `on_message`.
///
/// `Ok` acks the message, `Err(reason)` nacks it. Binding happens on the
/// calling thread so a rejected subscription is reported before anything is
/// spawned.
pub(crate) fn consume<S, F>(
    subscriber: Arc<S>,
    routing_key: &str,
    poll_interval: Duration,
    mut on_message: F,
) -> Result<TransportHandle, TransportError>
where
    S: Subscriber + ?Sized + 'static,
    F: FnMut(&Message) -> Result<(), String> + Send + 'static,
{
    subscriber.bind(routing_key)?;

    let routing_key = routing_key.to_string();
    let key = routing_key.clone();
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    let poll_ms = poll_interval.as_millis() as u64;
    let (stop_tx, stop_rx) = channel();

    let handle = thread::spawn(move || {
        let mut stats = TransportStats::default();
        debug!(routing_key = %key, "consumer started");

        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            stats.polls += 1;

            match subscriber.poll(&key, poll_ms) {
                Ok(Some(message)) => match on_message(&message) {
                    Ok(()) => {
                        let _ = subscriber.ack(&key, &message.id);
                        stats.handled += 1;
                    }
                    Err(reason) => {
                        warn!(
                            routing_key = %key,
                            message_id = %message.id,
                            %reason,
                            "message rejected"
                        );
                        let _ = subscriber.nack(&key, &message.id, &reason);
                        stats.failed += 1;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(routing_key = %key, error = %e, "poll failed");
                    thread::sleep(poll_interval);
                }
            }
        }

        debug!(
            routing_key = %key,
            handled = stats.handled,
            failed = stats.failed,
            "consumer stopped"
        );
        stats
    });

    Ok(TransportHandle {
        routing_key,
        stop_tx,
        handle: Some(handle),
    })
}
