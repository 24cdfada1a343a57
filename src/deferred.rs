//! Single-assignment completion cell.
//!
//! `deferred()` returns a `Completer` (the producing side, held by the
//! correlation tracker) and a `Deferred` (the consuming side, handed to the
//! caller). The first `settle` wins; later ones return `false` and are dropped.
//!
//! The result can be consumed exactly once, by blocking (`wait`,
//! `wait_timeout`), by `.await`, or by registering a continuation with
//! `on_settle`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::lock;

type Continuation<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

struct State<T, E> {
    settled: bool,
    outcome: Option<Result<T, E>>,
    continuation: Option<Continuation<T, E>>,
    waker: Option<Waker>,
}

struct Shared<T, E> {
    state: Mutex<State<T, E>>,
    ready: Condvar,
}

/// Create a linked completer/deferred pair.
pub fn deferred<T, E>() -> (Completer<T, E>, Deferred<T, E>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            settled: false,
            outcome: None,
            continuation: None,
            waker: None,
        }),
        ready: Condvar::new(),
    });
    (
        Completer {
            shared: Arc::clone(&shared),
        },
        Deferred { shared },
    )
}

/// The producing side of a deferred value.
pub struct Completer<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Completer<T, E> {
    /// Settle the deferred. Returns `false` if it was already settled.
    pub fn settle(&self, result: Result<T, E>) -> bool {
        let mut state = lock(&self.shared.state);
        if state.settled {
            return false;
        }
        state.settled = true;

        if let Some(continuation) = state.continuation.take() {
            drop(state);
            continuation(result);
            return true;
        }

        state.outcome = Some(result);
        let waker = state.waker.take();
        drop(state);

        self.shared.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, error: E) -> bool {
        self.settle(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.shared.state).settled
    }
}

/// The consuming side of a deferred value.
///
/// Implements `Future`, so async callers can `.await` it; threaded callers
/// use `wait`.
pub struct Deferred<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Deferred<T, E> {
    /// Check whether a result has been delivered.
    pub fn is_settled(&self) -> bool {
        lock(&self.shared.state).settled
    }

    /// Block until the deferred settles.
    pub fn wait(self) -> Result<T, E> {
        let mut state = lock(&self.shared.state);
        loop {
            if let Some(outcome) = state.outcome.take() {
                return outcome;
            }
            state = match self.shared.ready.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Block for at most `timeout`. Gives the deferred back if it has not settled.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<T, E>, Self> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        loop {
            if let Some(outcome) = state.outcome.take() {
                return Ok(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                drop(state);
                return Err(self);
            }
            state = match self.shared.ready.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Take the result if it is already available, without blocking.
    pub fn try_take(self) -> Result<Result<T, E>, Self> {
        let outcome = lock(&self.shared.state).outcome.take();
        outcome.ok_or(self)
    }

    /// Register a continuation to run with the result.
    ///
    /// Runs immediately on the calling thread if the deferred has already
    /// settled, otherwise on the thread that settles it.
    pub fn on_settle<F>(self, continuation: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let mut state = lock(&self.shared.state);
        match state.outcome.take() {
            Some(outcome) => {
                drop(state);
                continuation(outcome);
            }
            None => state.continuation = Some(Box::new(continuation)),
        }
    }
}

impl<T, E> Future for Deferred<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock(&self.shared.state);
        match state.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T, E> std::fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.is_settled())
            .finish()
    }
}
