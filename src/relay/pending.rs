//! Pending request correlation store.
//!
//! Turns the relay's asynchronous, many-in-flight message exchange into
//! per-call blocking semantics. A blocking tool call registers a waiter
//! under the outbound envelope id, the router resolves it when the
//! matching response arrives, and an expiry timer settles it with
//! [`Outcome::TimedOut`] if nothing arrives in time.
//!
//! # Settlement
//!
//! Every waiter reaches exactly one of `Resolved`, `TimedOut`, `Cancelled`.
//! Removal from the table under the lock is the single linearization
//! point: whichever of resolve/cancel/expiry removes the entry wins, and
//! the others observe "not found".
//!
//! ```text
//! add(id) ──► [table: id → waiter + timer]
//!                 │
//!     ┌───────────┼──────────────┐
//!  resolve(id)  cancel(id)   timer fires
//!     │           │              │
//!  Resolved    Cancelled      TimedOut
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::constants::MAX_REQUEST_TIMEOUT;
use crate::error::RelayError;

/// What the caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Waiting on an `approval_response`.
    Approval,
    /// Waiting on an `input_response`.
    Input,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approval => write!(f, "approval"),
            Self::Input => write!(f, "input"),
        }
    }
}

/// Terminal outcome of a pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The correlated response arrived.
    Resolved(Value),
    /// The deadline passed first.
    TimedOut,
    /// The request was aborted.
    Cancelled,
}

impl Outcome {
    /// Convert into a `Result`, mapping the two failure outcomes onto the
    /// error taxonomy.
    pub fn into_result(self) -> Result<Value, RelayError> {
        match self {
            Self::Resolved(value) => Ok(value),
            Self::TimedOut => Err(RelayError::TimedOut),
            Self::Cancelled => Err(RelayError::Cancelled),
        }
    }
}

/// Awaitable side of a registered request.
#[derive(Debug)]
pub struct PendingHandle {
    id: Uuid,
    deadline: Instant,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingHandle {
    /// Correlation id this handle waits on.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the expiry timer fires.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the terminal outcome.
    ///
    /// If the store itself is dropped while the request is in flight the
    /// request counts as cancelled.
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Outcome::Cancelled)
    }
}

struct Waiter {
    kind: RequestKind,
    generation: u64,
    reply: oneshot::Sender<Outcome>,
    timer: AbortHandle,
}

impl Waiter {
    fn settle(self, outcome: Outcome) {
        self.timer.abort();
        // Caller may have stopped waiting; that is not an error.
        let _ = self.reply.send(outcome);
    }
}

#[derive(Default)]
struct Table {
    waiters: HashMap<Uuid, Waiter>,
    next_generation: u64,
}

/// Shared table of in-flight requests.
///
/// Cheap to share behind an `Arc`; every operation takes the lock only
/// for a map insert or remove.
#[derive(Default)]
pub struct PendingRequests {
    table: Mutex<Table>,
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("in_flight", &self.len())
            .finish()
    }
}

impl PendingRequests {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter under `id` and start its expiry timer.
    ///
    /// Must be called from within a tokio runtime. Registering an id that
    /// is already in flight cancels the earlier waiter. `timeout` is
    /// clamped to [`MAX_REQUEST_TIMEOUT`].
    pub fn add(self: &Arc<Self>, id: Uuid, kind: RequestKind, timeout: Duration) -> PendingHandle {
        let timeout = timeout.min(MAX_REQUEST_TIMEOUT);
        let (reply, rx) = oneshot::channel();

        let mut table = self.lock();
        let generation = table.next_generation;
        table.next_generation += 1;

        // Deadline is fixed now, not when the timer task is first polled.
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now);
        let store: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(store) = store.upgrade() {
                store.expire(id, generation);
            }
        })
        .abort_handle();

        let waiter = Waiter { kind, generation, reply, timer };
        if let Some(previous) = table.waiters.insert(id, waiter) {
            log::warn!("Pending {} request {} re-registered; cancelling earlier waiter", previous.kind, id);
            previous.settle(Outcome::Cancelled);
        }
        drop(table);

        log::debug!("Pending {} request {} registered (timeout {:?})", kind, id, timeout);
        PendingHandle { id, deadline, rx }
    }

    /// Settle `id` with `value`.
    ///
    /// Returns `false` without error when `id` is unknown (already settled,
    /// timed out, or never registered).
    pub fn resolve(&self, id: Uuid, value: Value) -> bool {
        let Some(waiter) = self.lock().waiters.remove(&id) else {
            return false;
        };
        log::debug!("Pending {} request {} resolved", waiter.kind, id);
        waiter.settle(Outcome::Resolved(value));
        true
    }

    /// Abort `id`. No-op if it is not in flight. Returns whether a waiter
    /// was cancelled.
    pub fn cancel(&self, id: Uuid) -> bool {
        let Some(waiter) = self.lock().waiters.remove(&id) else {
            return false;
        };
        log::debug!("Pending {} request {} cancelled", waiter.kind, id);
        waiter.settle(Outcome::Cancelled);
        true
    }

    /// Timer path. Only expires the registration that armed this timer.
    fn expire(&self, id: Uuid, generation: u64) {
        let mut table = self.lock();
        let armed = table
            .waiters
            .get(&id)
            .is_some_and(|w| w.generation == generation);
        if !armed {
            return;
        }
        let Some(waiter) = table.waiters.remove(&id) else {
            return;
        };
        drop(table);

        log::info!("Pending {} request {} timed out", waiter.kind, id);
        waiter.settle(Outcome::TimedOut);
    }

    /// Whether `id` is still in flight.
    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().waiters.contains_key(&id)
    }

    /// Number of requests in flight.
    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
