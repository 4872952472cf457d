//! The waiter queue.
//!
//! Every pending [`await_match`](WaiterQueue::await_match) call owns one slot
//! in the queue. The stream reader offers each decoded event to
//! [`try_claim`](WaiterQueue::try_claim), which hands it to the first
//! registered waiter whose type tag and pattern accept it.
//!
//! # Exactly-once resolution
//!
//! Each slot carries a one-shot done flag. Whoever flips it first (a claim,
//! a cancellation, an abandoned future or [`cancel_all`](WaiterQueue::cancel_all))
//! is the only party allowed to resolve the waiter. The queue lock only
//! serializes the decision; the resolution itself is sent after the lock is
//! released.
//!
//! ```text
//!   try_claim ──┐                 ┌── cancel / drop
//!               ▼                 ▼
//!          done.set_done()   done.set_done()
//!               │ won             │ won
//!               ▼                 ▼
//!      send(event) after     remove slot,
//!        unlocking           resolve to None
//! ```
//!
//! Once the stream reader stops reading it [`close`](WaiterQueue::close)s the
//! queue: pending waiters fail, and so does every waiter registered before
//! the next reader [`reopen`](WaiterQueue::reopen)s it.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, trace, warn};

use super::error::{WaitError, WaitResult, panic_message};
use super::pattern::Pattern;
use super::scheduler::SharedScheduler;
use crate::foundation::event::{ConcreteEvent, Event, EventType};

type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;
type Resolution = Result<Event, WaitError>;

/// Registration order of a waiter. Ids are never reused within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaiterId(u64);

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

#[derive(Debug, Default)]
struct DoneFlag(AtomicBool);

impl DoneFlag {
    /// Returns `true` for exactly one caller over the flag's lifetime.
    fn set_done(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    fn is_done(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Slot {
    event_type: EventType,
    predicate: Predicate,
    done: Arc<DoneFlag>,
    resume: oneshot::Sender<Resolution>,
}

#[derive(Default)]
struct Slots {
    pending: BTreeMap<WaiterId, Slot>,
    /// Set while the queue refuses new waiters.
    closed: Option<WaitError>,
}

struct Shared {
    slots: Mutex<Slots>,
    next_id: AtomicU64,
    scheduler: SharedScheduler,
}

impl Shared {
    async fn remove(&self, id: WaiterId) {
        self.slots.lock().await.pending.remove(&id);
    }

    /// Removes a slot without awaiting: inline if the lock is free, otherwise
    /// on the scheduler.
    fn detach(self: &Arc<Self>, id: WaiterId) {
        match self.slots.try_lock() {
            Ok(mut slots) => {
                slots.pending.remove(&id);
            }
            Err(_) => {
                trace!(waiter_id = %id, "Queue busy, deferring waiter removal");
                let shared = Arc::clone(self);
                self.scheduler.spawn(Box::pin(async move {
                    shared.remove(id).await;
                }));
            }
        }
    }
}

/// Outcome of offering an event to the queue.
#[derive(Debug)]
#[must_use]
pub enum Claim {
    /// A waiter took the event.
    Claimed,
    /// No waiter matched; the event is handed back.
    Unclaimed(Event),
}

impl Claim {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// Ordered set of pending waiters behind an async lock.
#[derive(Clone)]
pub struct WaiterQueue {
    shared: Arc<Shared>,
}

impl WaiterQueue {
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(Slots::default()),
                next_id: AtomicU64::new(0),
                scheduler,
            }),
        }
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.shared.scheduler
    }

    /// Registers a waiter for `E` events accepted by `pattern`.
    ///
    /// Returns as soon as the waiter is queued; await the returned
    /// [`PendingWaiter`] to receive the event.
    pub async fn enqueue<E, P>(&self, pattern: P) -> PendingWaiter<E>
    where
        E: ConcreteEvent,
        P: Pattern<E>,
    {
        let (resume, receiver) = oneshot::channel();
        let done = Arc::new(DoneFlag::default());
        let predicate: Predicate =
            Box::new(move |event| E::peek(event).is_some_and(|event| pattern.matches(event)));

        let (id, refused) = {
            let mut guard = self.shared.slots.lock().await;
            let slots = &mut *guard;
            let id = WaiterId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
            match &slots.closed {
                Some(error) => (id, Some((error.clone(), resume))),
                None => {
                    slots.pending.insert(
                        id,
                        Slot {
                            event_type: E::TYPE,
                            predicate,
                            done: Arc::clone(&done),
                            resume,
                        },
                    );
                    (id, None)
                }
            }
        };

        match refused {
            Some((error, resume)) => {
                done.set_done();
                debug!(waiter_id = %id, event_type = %E::TYPE, %error, "Queue closed, waiter refused");
                let _ = resume.send(Err(error));
            }
            None => debug!(waiter_id = %id, event_type = %E::TYPE, "Waiter registered"),
        }

        PendingWaiter {
            id,
            done,
            receiver,
            shared: Arc::clone(&self.shared),
            state: WaiterState::Pending,
            _event: PhantomData,
        }
    }

    /// Offers `event` to the pending waiters in registration order.
    ///
    /// The first waiter whose type tag matches and whose pattern accepts the
    /// event is removed and resolved with it. Waiters whose pattern panics are
    /// resolved with [`WaitError::PredicatePanicked`] and skipped.
    pub async fn try_claim(&self, event: Event) -> Claim {
        let event_type = event.event_type();

        let (winner, panicked) = {
            let mut slots = self.shared.slots.lock().await;
            let mut stale = Vec::new();
            let mut panicked = Vec::new();
            let mut winner = None;

            for (&id, slot) in slots.pending.iter() {
                if slot.done.is_done() {
                    stale.push(id);
                    continue;
                }
                if slot.event_type != event_type {
                    continue;
                }
                match catch_unwind(AssertUnwindSafe(|| (slot.predicate)(&event))) {
                    Ok(false) => {}
                    Ok(true) if slot.done.set_done() => {
                        winner = Some(id);
                        break;
                    }
                    Ok(true) => stale.push(id),
                    Err(payload) if slot.done.set_done() => {
                        panicked.push((id, panic_message(payload.as_ref())));
                    }
                    Err(_) => stale.push(id),
                }
            }

            for id in stale {
                slots.pending.remove(&id);
            }
            let panicked: Vec<_> = panicked
                .into_iter()
                .filter_map(|(id, message)| slots.pending.remove(&id).map(|slot| (id, slot, message)))
                .collect();
            let winner = winner.and_then(|id| slots.pending.remove(&id).map(|slot| (id, slot)));
            (winner, panicked)
        };

        for (id, slot, message) in panicked {
            warn!(waiter_id = %id, %event_type, panic = %message, "Waiter pattern panicked");
            let _ = slot.resume.send(Err(WaitError::PredicatePanicked(message)));
        }

        match winner {
            Some((id, slot)) => {
                debug!(waiter_id = %id, %event_type, "Event claimed by waiter");
                if slot.resume.send(Ok(event)).is_err() {
                    trace!(waiter_id = %id, "Waiter went away after its claim");
                }
                Claim::Claimed
            }
            None => Claim::Unclaimed(event),
        }
    }

    /// Cancels `waiter`. See [`PendingWaiter::cancel`].
    pub async fn cancel<E: ConcreteEvent>(&self, waiter: PendingWaiter<E>) -> WaitResult<Option<E>> {
        waiter.cancel().await
    }

    /// Resolves every pending waiter with `error`. Returns how many were resolved.
    pub async fn cancel_all(&self, error: WaitError) -> usize {
        self.resolve_all(error, false).await
    }

    /// Like [`cancel_all`](Self::cancel_all), and waiters registered until
    /// [`reopen`](Self::reopen) resolve with `error` right away.
    pub async fn close(&self, error: WaitError) -> usize {
        self.resolve_all(error, true).await
    }

    /// Accepts new waiters again after [`close`](Self::close).
    pub async fn reopen(&self) {
        if self.shared.slots.lock().await.closed.take().is_some() {
            debug!("Waiter queue reopened");
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.slots.lock().await.closed.is_some()
    }

    async fn resolve_all(&self, error: WaitError, close: bool) -> usize {
        let resumes: Vec<_> = {
            let mut slots = self.shared.slots.lock().await;
            if close {
                slots.closed = Some(error.clone());
            }
            std::mem::take(&mut slots.pending)
                .into_values()
                .filter(|slot| slot.done.set_done())
                .map(|slot| slot.resume)
                .collect()
        };

        let count = resumes.len();
        for resume in resumes {
            let _ = resume.send(Err(error.clone()));
        }
        if count > 0 {
            debug!(count, %error, "Cancelled all pending waiters");
        }
        count
    }

    /// Number of waiters that are still pending.
    pub async fn len(&self) -> usize {
        let slots = self.shared.slots.lock().await;
        slots.pending.values().filter(|slot| !slot.done.is_done()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl fmt::Debug for WaiterQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaiterQueue")
            .field("next_id", &self.shared.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PendingWaiter
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaiterState {
    Pending,
    /// Cancellation won the flag; the slot may still be in the queue.
    Removing,
    Settled,
}

/// A registered waiter. Resolves to the matched event.
///
/// Dropping an unresolved waiter cancels it.
#[must_use = "a waiter does nothing unless awaited or cancelled"]
pub struct PendingWaiter<E> {
    id: WaiterId,
    done: Arc<DoneFlag>,
    receiver: oneshot::Receiver<Resolution>,
    shared: Arc<Shared>,
    state: WaiterState,
    _event: PhantomData<fn() -> E>,
}

impl<E: ConcreteEvent> PendingWaiter<E> {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Withdraws the waiter.
    ///
    /// Returns `Ok(None)` if the cancellation took effect. If a claim
    /// committed first, returns that claim's outcome instead. Cancelling an
    /// already resolved waiter is a no-op returning `Ok(None)`.
    pub async fn cancel(mut self) -> WaitResult<Option<E>> {
        if self.state != WaiterState::Pending {
            return Ok(None);
        }
        if self.done.set_done() {
            self.state = WaiterState::Removing;
            self.shared.remove(self.id).await;
            self.state = WaiterState::Settled;
            debug!(waiter_id = %self.id, "Waiter cancelled");
            return Ok(None);
        }

        trace!(waiter_id = %self.id, "Cancel lost to a claim, collecting its result");
        (&mut self).await.map(Some)
    }
}

impl<E: ConcreteEvent> Future for PendingWaiter<E> {
    type Output = WaitResult<E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.state != WaiterState::Pending {
            return Poll::Ready(Err(WaitError::Closed));
        }

        let resolution = ready!(Pin::new(&mut self.receiver).poll(cx));
        self.state = WaiterState::Settled;

        Poll::Ready(match resolution {
            Ok(Ok(event)) => E::extract(event).map_err(|other| WaitError::TypeMismatch {
                expected: E::TYPE,
                found: other.event_type(),
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(WaitError::Closed),
        })
    }
}

impl<E> Drop for PendingWaiter<E> {
    fn drop(&mut self) {
        match self.state {
            WaiterState::Settled => {}
            WaiterState::Removing => self.shared.detach(self.id),
            WaiterState::Pending => {
                if self.done.set_done() {
                    trace!(waiter_id = %self.id, "Waiter abandoned");
                    self.shared.detach(self.id);
                }
            }
        }
    }
}

impl<E> fmt::Debug for PendingWaiter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWaiter")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}
