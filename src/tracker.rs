//! Correlation tracker - matches replies to the requests waiting for them.
//!
//! ```text
//! Request:   register(id) ──► slot { completer, timer } ──► Deferred to caller
//! Reply:     listen(reply_to) ──► decode ──► resolve(envelope) ──► slot removed, settled
//! Timeout:   reaper thread ──► deadline passed ──► slot removed, rejected with TimeoutError
//! ```
//!
//! Every path removes the slot under the table lock before settling it, so
//! whichever of reply / timeout / publish failure gets there first is the
//! only one that settles. Late or duplicate replies find no slot and are
//! dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::Subscriber;
use crate::deferred::{deferred, Completer};
use crate::envelope::{Codec, Envelope};
use crate::error::{RequestError, SetupError, TimeoutError, TrackerError};
use crate::lock;
use crate::transport::{consume, TransportHandle};
use crate::Reply;

type TimerKey = (Instant, u64);

struct Slot {
    routing_key: String,
    created_at: Instant,
    timeout: Duration,
    /// `None` when the deadline lies beyond the clock's range.
    timer: Option<TimerKey>,
    completer: Completer<Value, RequestError>,
}

#[derive(Default)]
struct Table {
    slots: HashMap<String, Slot>,
    /// Deadline index; the sequence number keeps equal deadlines distinct.
    deadlines: BTreeMap<TimerKey, String>,
    next_seq: u64,
}

impl Table {
    fn take(&mut self, correlation_id: &str) -> Option<Slot> {
        let slot = self.slots.remove(correlation_id)?;
        if let Some(timer) = &slot.timer {
            self.deadlines.remove(timer);
        }
        Some(slot)
    }

    fn expire(&mut self, now: Instant) -> Vec<(String, Slot)> {
        let mut expired = Vec::new();
        while let Some(entry) = self.deadlines.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let correlation_id = entry.remove();
            if let Some(slot) = self.slots.remove(&correlation_id) {
                expired.push((correlation_id, slot));
            }
        }
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.keys().next().map(|(deadline, _)| *deadline)
    }
}

struct Shared {
    table: Mutex<Table>,
    /// Signalled when the deadline index changes or on shutdown
    changed: Condvar,
    shutdown: AtomicBool,
}

/// Stops the reaper thread once the last tracker clone is dropped.
struct ReaperGuard {
    shared: Arc<Shared>,
}

impl Drop for ReaperGuard {
    fn drop(&mut self) {
        let _table = lock(&self.shared.table);
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.changed.notify_all();
    }
}

/// Process-wide table of requests awaiting a reply.
///
/// Cheap to clone; clones share the same table and timer thread.
#[derive(Clone)]
pub struct CorrelationTracker {
    shared: Arc<Shared>,
    _reaper: Arc<ReaperGuard>,
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTracker {
    /// Create a tracker and start its timeout thread.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            table: Mutex::new(Table::default()),
            changed: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let reaper_shared = Arc::clone(&shared);
        thread::spawn(move || reap(reaper_shared));

        Self {
            _reaper: Arc::new(ReaperGuard {
                shared: Arc::clone(&shared),
            }),
            shared,
        }
    }

    /// Open a pending slot for `correlation_id`.
    ///
    /// The returned deferred settles with the reply, or rejects with a
    /// `TimeoutError` once `timeout` elapses without one. A timeout too large
    /// to represent as a deadline never fires.
    pub fn register(
        &self,
        correlation_id: &str,
        routing_key: &str,
        timeout: Duration,
    ) -> Result<Reply, TrackerError> {
        let mut table = self.table();
        if table.slots.contains_key(correlation_id) {
            return Err(TrackerError::DuplicateCorrelationId(correlation_id.to_string()));
        }

        let created_at = Instant::now();
        let timer = match created_at.checked_add(timeout) {
            Some(deadline) => {
                let timer = (deadline, table.next_seq);
                table.next_seq += 1;
                table.deadlines.insert(timer, correlation_id.to_string());
                Some(timer)
            }
            None => {
                debug!(correlation_id, ?timeout, "timeout out of range; request will not expire");
                None
            }
        };

        let (completer, reply) = deferred();
        table.slots.insert(
            correlation_id.to_string(),
            Slot {
                routing_key: routing_key.to_string(),
                created_at,
                timeout,
                timer,
                completer,
            },
        );
        drop(table);

        self.shared.changed.notify_all();
        debug!(correlation_id, routing_key, ?timeout, "request pending");
        Ok(reply)
    }

    /// Settle the slot matching the envelope's correlation id.
    ///
    /// Returns `false` when no slot is waiting: the id is unknown, already
    /// answered, or timed out. Redelivered replies end up here.
    pub fn resolve(&self, envelope: Envelope) -> bool {
        let Some(slot) = self.table().take(&envelope.correlation_id) else {
            debug!(
                correlation_id = %envelope.correlation_id,
                status = %envelope.status(),
                "discarding reply with no pending request"
            );
            return false;
        };

        debug!(
            correlation_id = %envelope.correlation_id,
            routing_key = %slot.routing_key,
            status = %envelope.status(),
            elapsed = ?slot.created_at.elapsed(),
            "reply received"
        );
        slot.completer.settle(envelope.response.into_result())
    }

    /// Remove a slot and reject its deferred with `error`.
    ///
    /// Used when the request never made it onto the bus.
    pub fn reject(&self, correlation_id: &str, error: RequestError) -> bool {
        let slot = self.table().take(correlation_id);
        match slot {
            Some(slot) => slot.completer.reject(error),
            None => false,
        }
    }

    /// Number of requests still awaiting a reply.
    pub fn pending(&self) -> usize {
        self.table().slots.len()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.table().slots.contains_key(correlation_id)
    }

    /// Consume replies from `reply_to` and resolve them against this tracker.
    ///
    /// Replies that fail to decode are logged and nacked. If such a reply
    /// still names a pending correlation id, that request is rejected with
    /// the `ProtocolError` instead of waiting out its timeout.
    pub fn listen<S>(
        &self,
        subscriber: Arc<S>,
        reply_to: &str,
        poll_interval: Duration,
        codec: Codec,
    ) -> Result<TransportHandle, SetupError>
    where
        S: Subscriber + ?Sized + 'static,
    {
        let tracker = self.clone();
        let handle = consume(subscriber, reply_to, poll_interval, move |message| {
            match codec.decode(&message.payload) {
                Ok(envelope) => {
                    tracker.resolve(envelope);
                    Ok(())
                }
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "undecodable reply");
                    if let Some(correlation_id) = codec.correlation_id_of(&message.payload) {
                        tracker.reject(&correlation_id, RequestError::Protocol(e.clone()));
                    }
                    Err(e.to_string())
                }
            }
        })?;
        Ok(handle)
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        lock(&self.shared.table)
    }
}

fn reap(shared: Arc<Shared>) {
    let mut table = lock(&shared.table);

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let now = Instant::now();
        let expired = table.expire(now);
        if !expired.is_empty() {
            drop(table);
            for (correlation_id, slot) in expired {
                warn!(
                    correlation_id = %correlation_id,
                    routing_key = %slot.routing_key,
                    timeout = ?slot.timeout,
                    "request timed out"
                );
                slot.completer.reject(RequestError::Timeout(TimeoutError {
                    correlation_id,
                    routing_key: slot.routing_key,
                    timeout: slot.timeout,
                }));
            }
            table = lock(&shared.table);
            continue;
        }

        let next_deadline = table.next_deadline();
        table = match next_deadline {
            Some(deadline) => match shared.changed.wait_timeout(table, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            },
            None => match shared.changed.wait(table) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            },
        };
    }
}
