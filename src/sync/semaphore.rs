//! An asynchronously awaitable semaphore for synchronization between concurrently
//! executing futures.
//!
//! Permits are tracked by a [`Counter`] holding
//! `free permits - queued waiters`. A negative value of `-k` means `k`
//! acquirers are parked in the wait queue. Releasing a permit while the
//! counter is negative hands it straight to the oldest waiter, so a new
//! arrival can never overtake a queued one.

use crate::{
    atomic::{AtomicInt32, Counter, OutOfRange},
    waker::RWaker,
};
use abi_stable::{
    external_types::parking_lot::RMutex,
    std_types::{
        RArc,
        ROption::{self, *},
    },
    StableAbi,
};
use core::{fmt, pin::Pin, time::Duration};
use futures_core::future::{FusedFuture, Future};
use futures_core::task::{Context, Poll};
use log::{debug, error, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// The error returned when a permit could not be obtained.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum AcquireError {
    /// The semaphore was [reset](Semaphore::reset) while the acquirer was
    /// queued.
    Reset,
    /// No permit was granted before the deadline passed to
    /// [`Semaphore::run_with_timeout`].
    Timeout,
    /// The permit counter cannot represent one more queued acquirer.
    OutOfRange(OutOfRange),
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::Reset => f.write_str("semaphore was reset"),
            AcquireError::Timeout => f.write_str("semaphore acquire timed out"),
            AcquireError::OutOfRange(_) => f.write_str("semaphore counter out of range"),
        }
    }
}

impl std::error::Error for AcquireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AcquireError::OutOfRange(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OutOfRange> for AcquireError {
    fn from(e: OutOfRange) -> Self {
        AcquireError::OutOfRange(e)
    }
}

/// Tracks how the future had interacted with the semaphore
#[derive(PartialEq, StableAbi, Debug, Copy, Clone)]
#[repr(u8)]
enum PollState {
    /// The task has never interacted with the semaphore.
    New,
    /// The task was added to the wait queue at the semaphore.
    Waiting,
    /// The task had been polled to completion.
    Done,
}

/// What a queued acquirer was handed when it left the wait queue.
#[derive(PartialEq, StableAbi, Debug, Copy, Clone)]
#[repr(u8)]
enum Handoff {
    /// A permit released by its previous owner.
    Permit,
    /// Access granted by `release_all`, which owes nothing back.
    Free,
    /// The semaphore was reset.
    Reset,
}

/// A parked acquirer.
#[derive(StableAbi, Debug)]
#[repr(C)]
struct WaitQueueEntry {
    /// Identifies the `SemaphoreAcquire` future owning this entry
    id: u64,
    /// The task handle of the waiting task
    task: ROption<RWaker>,
}

/// A handoff waiting to be picked up by the future it was made for.
#[derive(Debug)]
struct Grant {
    handoff: Handoff,
    /// Generation the handoff was made in
    generation: u64,
}

/// Internal state of the `Semaphore`, guarded by its mutex.
#[derive(Debug)]
struct SemaphoreState {
    /// Parked acquirers in arrival order
    waiters: VecDeque<WaitQueueEntry>,
    /// Handoffs made to acquirers which have not been polled since
    grants: HashMap<u64, Grant>,
    /// Bumped by `reset` and `release_all`. Releasers from an older
    /// generation no longer owe a permit.
    generation: u64,
    next_id: u64,
}

impl SemaphoreState {
    fn new() -> Self {
        SemaphoreState {
            waiters: VecDeque::new(),
            grants: HashMap::new(),
            generation: 0,
            next_id: 0,
        }
    }

    /// Parks the task behind all current waiters and returns its id.
    fn enqueue(&mut self, cx: &mut Context<'_>) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.waiters.push_back(WaitQueueEntry {
            id,
            task: RSome(RWaker::new(cx.waker().clone())),
        });
        trace!("semaphore: acquirer {} queued ({} waiting)", id, self.waiters.len());
        id
    }

    /// Removes the oldest waiter, records `handoff` for it and wakes it up.
    ///
    /// Returns false if nobody was waiting.
    fn hand_off_next(&mut self, handoff: Handoff) -> bool {
        match self.waiters.pop_front() {
            Some(mut waiter) => {
                trace!("semaphore: {:?} handed to acquirer {}", handoff, waiter.id);
                self.grants.insert(
                    waiter.id,
                    Grant {
                        handoff,
                        generation: self.generation,
                    },
                );
                if let RSome(handle) = waiter.task.take() {
                    handle.wake();
                }
                true
            }
            None => false,
        }
    }

    /// Hands `handoff` to every waiter and starts a new generation.
    fn drain(&mut self, handoff: Handoff) -> usize {
        let mut drained = 0;
        while self.hand_off_next(handoff) {
            drained += 1;
        }
        self.generation = self.generation.wrapping_add(1);
        drained
    }

    /// Removes a waiter that gave up before being served.
    ///
    /// Returns false if the waiter had already left the queue.
    fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|waiter| waiter.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    fn update_waker(&mut self, id: u64, cx: &mut Context<'_>) {
        if let Some(waiter) = self.waiters.iter_mut().find(|waiter| waiter.id == id) {
            match waiter.task {
                RSome(ref mut handle) => handle.update(cx.waker()),
                RNone => waiter.task = RSome(RWaker::new(cx.waker().clone())),
            }
        }
    }
}

/// State shared by all handles to one semaphore.
struct Shared {
    max_count: usize,
    counter: Arc<dyn Counter>,
    state: RMutex<SemaphoreState>,
}

impl Shared {
    /// The fast path: takes a permit if one is free, otherwise leaves the
    /// counter one lower to account for the acquirer that is about to be
    /// queued. Must be called with the state lock held.
    fn take_permit(&self) -> Result<bool, OutOfRange> {
        Ok(self.counter.sub(1)? > 0)
    }

    /// Gives back one permit owned by a releaser of `generation`.
    ///
    /// The permit goes directly to the oldest waiter if there is one.
    fn release(&self, state: &mut SemaphoreState, generation: u64) {
        if generation != state.generation {
            trace!("semaphore: ignoring release from generation {}", generation);
            return;
        }
        match self.counter.add(1) {
            Ok(previous) if previous < 0 => {
                if !state.hand_off_next(Handoff::Permit) {
                    // The counter is shared with code that does not use this
                    // wait queue. Nothing to hand the permit to.
                    warn!(
                        "semaphore: counter was {} but no acquirer is queued",
                        previous
                    );
                }
            }
            Ok(_) => {}
            Err(e) => error!("semaphore: failed to release permit: {}", e),
        }
    }

    /// Sets the counter back to `max_count`. Must be called with the state
    /// lock held, after the wait queue was drained.
    fn restore(&self) {
        if let Err(e) = self.counter.set(self.max_count as i64) {
            error!("semaphore: failed to restore permits: {}", e);
        }
    }
}

/// An RAII guard returned by the `acquire` and `try_acquire` methods.
///
/// When this structure is dropped (falls out of scope), the permit is
/// released back to the Semaphore, or handed directly to the next waiter.
/// Since releasing consumes the guard, a permit can never be released twice.
pub struct Releaser {
    /// The Semaphore which is associated with this Releaser.
    /// `None` for the no-op releasers handed out by `release_all`.
    semaphore: Option<Semaphore>,
    /// Generation of the semaphore the permit was granted in
    generation: u64,
}

impl fmt::Debug for Releaser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Releaser")
            .field("noop", &self.is_noop())
            .field("generation", &self.generation)
            .finish()
    }
}

impl Releaser {
    fn new(semaphore: Semaphore, generation: u64) -> Self {
        Releaser {
            semaphore: Some(semaphore),
            generation,
        }
    }

    fn noop() -> Self {
        Releaser {
            semaphore: None,
            generation: 0,
        }
    }

    /// Releases the permit.
    ///
    /// This is the same as dropping the `Releaser`.
    pub fn release(self) {
        drop(self)
    }

    /// Returns true if releasing this guard has no effect.
    ///
    /// This is the case for the guards that [`Semaphore::release_all`] hands
    /// to queued acquirers.
    pub fn is_noop(&self) -> bool {
        self.semaphore.is_none()
    }
}

impl Drop for Releaser {
    fn drop(&mut self) {
        if let Some(semaphore) = self.semaphore.take() {
            let mut state = semaphore.shared.state.lock();
            semaphore.shared.release(&mut state, self.generation);
        }
    }
}

/// A future which resolves when the target semaphore has been successfully acquired.
#[must_use = "futures do nothing unless polled"]
pub struct SemaphoreAcquire {
    /// The Semaphore which should get acquired trough this Future
    semaphore: Option<Semaphore>,
    /// Current polling state
    state: PollState,
    /// Position handle in the wait queue, valid while `Waiting`
    id: u64,
}

impl fmt::Debug for SemaphoreAcquire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreAcquire")
            .field("state", &self.state)
            .finish()
    }
}

impl Future for SemaphoreAcquire {
    type Output = Result<Releaser, AcquireError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let semaphore = this
            .semaphore
            .as_ref()
            .expect("polled SemaphoreAcquire after completion");

        let res = {
            let shared = &semaphore.shared;
            let mut state = shared.state.lock();

            match this.state {
                PollState::New => match shared.take_permit() {
                    Ok(true) => Poll::Ready(Ok(Some(state.generation))),
                    Ok(false) => {
                        this.id = state.enqueue(cx);
                        this.state = PollState::Waiting;
                        Poll::Pending
                    }
                    Err(e) => Poll::Ready(Err(AcquireError::from(e))),
                },
                PollState::Waiting => match state.grants.remove(&this.id) {
                    Some(Grant {
                        handoff: Handoff::Permit,
                        generation,
                    }) => Poll::Ready(Ok(Some(generation))),
                    Some(Grant {
                        handoff: Handoff::Free,
                        ..
                    }) => Poll::Ready(Ok(None)),
                    Some(Grant {
                        handoff: Handoff::Reset,
                        ..
                    }) => Poll::Ready(Err(AcquireError::Reset)),
                    None => {
                        state.update_waker(this.id, cx);
                        Poll::Pending
                    }
                },
                PollState::Done => {
                    // The future had been polled to completion before
                    panic!("polled SemaphoreAcquire after completion");
                }
            }
        };

        match res {
            Poll::Pending => Poll::Pending,
            Poll::Ready(res) => {
                this.state = PollState::Done;
                let semaphore = this.semaphore.take();
                // `None` marks access granted by `release_all`
                Poll::Ready(res.map(|generation| match generation {
                    Some(generation) => Releaser {
                        semaphore,
                        generation,
                    },
                    None => Releaser::noop(),
                }))
            }
        }
    }
}

impl FusedFuture for SemaphoreAcquire {
    fn is_terminated(&self) -> bool {
        self.semaphore.is_none()
    }
}

impl Drop for SemaphoreAcquire {
    fn drop(&mut self) {
        if self.state != PollState::Waiting {
            return;
        }
        let semaphore = match self.semaphore.take() {
            Some(semaphore) => semaphore,
            None => return,
        };
        let shared = &semaphore.shared;
        let mut state = shared.state.lock();

        if state.remove_waiter(self.id) {
            // Still queued: take back the decrement made when we were queued.
            trace!("semaphore: acquirer {} cancelled while queued", self.id);
            if let Err(e) = shared.counter.add(1) {
                error!("semaphore: failed to dequeue acquirer {}: {}", self.id, e);
            }
        } else if let Some(grant) = state.grants.remove(&self.id) {
            // A permit was handed to us but never picked up. Pass it on.
            if grant.handoff == Handoff::Permit {
                trace!("semaphore: acquirer {} dropped an unclaimed permit", self.id);
                shared.release(&mut state, grant.generation);
            }
        }
    }
}

/// A futures-aware counting semaphore with FIFO ordering of waiters.
///
/// Cloning a `Semaphore` yields another handle to the same set of permits.
///
/// # Fairness
///
/// Acquirers which find no free permit are served strictly in arrival order.
/// A released permit is handed directly to the oldest of them, the counter
/// only becomes positive again once nobody is waiting.
///
/// # Shared counters
///
/// [`Semaphore::with_counter`] accepts an externally owned [`Counter`]. The
/// wait queue however always belongs to a single `Semaphore` and its clones.
/// Several semaphores with separate queues sharing one counter is not
/// supported: a release may find the counter negative without a local waiter
/// to hand the permit to.
pub struct Semaphore {
    shared: RArc<Shared>,
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("max_count", &self.max_count())
            .field("permits", &self.permits())
            .field("waiters", &self.waiters_count())
            .finish()
    }
}

impl Clone for Semaphore {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Semaphore {
    /// Creates a new futures-aware semaphore with `max_count` permits.
    ///
    /// # Panics
    ///
    /// Panics if `max_count` is zero or does not fit into an `i32`.
    pub fn new(max_count: usize) -> Semaphore {
        assert!(max_count > 0, "a semaphore needs at least one permit");
        let initial = i32::try_from(max_count).expect("max_count must fit into an i32");
        Self::with_counter(max_count, Arc::new(AtomicInt32::new(initial)))
    }

    /// Creates a new semaphore with `max_count` permits which are tracked by
    /// `counter`.
    ///
    /// The counter is used as is. It should hold `max_count` unless it is
    /// deliberately shared with an existing semaphore.
    ///
    /// # Panics
    ///
    /// Panics if `max_count` is zero.
    pub fn with_counter(max_count: usize, counter: Arc<dyn Counter>) -> Semaphore {
        assert!(max_count > 0, "a semaphore needs at least one permit");
        Semaphore {
            shared: RArc::new(Shared {
                max_count,
                counter,
                state: RMutex::new(SemaphoreState::new()),
            }),
        }
    }

    /// Acquires a permit asynchronously.
    ///
    /// This method returns a future that will resolve once a permit has been
    /// acquired. The future resolves to a [`Releaser`], which releases the
    /// permit when dropped.
    ///
    /// Dropping the future before it completes gives up its place in the
    /// wait queue. If a permit had already been handed to it, the permit is
    /// passed on to the next waiter.
    pub fn acquire(&self) -> SemaphoreAcquire {
        SemaphoreAcquire {
            semaphore: Some(self.clone()),
            state: PollState::New,
            id: 0,
        }
    }

    /// Acquires a permit and passes its [`Releaser`] to `callback`.
    pub async fn acquire_with<F, R>(&self, callback: F) -> Result<R, AcquireError>
    where
        F: FnOnce(Releaser) -> R,
    {
        self.acquire().await.map(callback)
    }

    /// Tries to acquire a permit without waiting.
    ///
    /// Returns `None` exactly when [`is_locked`](Semaphore::is_locked) would
    /// have returned `true`. Never joins the wait queue.
    pub fn try_acquire(&self) -> Option<Releaser> {
        let shared = &self.shared;
        let state = shared.state.lock();
        match shared.take_permit() {
            Ok(true) => Some(Releaser::new(self.clone(), state.generation)),
            Ok(false) => {
                if let Err(e) = shared.counter.add(1) {
                    error!("semaphore: failed to undo try_acquire: {}", e);
                }
                None
            }
            Err(e) => {
                debug!("semaphore: try_acquire rejected: {}", e);
                None
            }
        }
    }

    /// Returns true if acquiring a permit right now would have to wait.
    ///
    /// For semaphores with more than one permit this means "no permit is
    /// free", not "every permit is held by a different owner".
    pub fn is_locked(&self) -> bool {
        self.shared.counter.get() < 1
    }

    /// Returns the number of acquirers currently waiting in the queue.
    ///
    /// The value is only a snapshot and may be outdated as soon as it is
    /// returned.
    pub fn waiters_count(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Returns the number of permits that can be acquired without waiting.
    pub fn permits(&self) -> usize {
        usize::try_from(self.shared.counter.get()).unwrap_or(0)
    }

    /// Returns the total number of permits.
    pub fn max_count(&self) -> usize {
        self.shared.max_count
    }

    /// Acquires a permit, runs `f` to completion and releases the permit.
    ///
    /// The output of `f`, including any error it reports, is returned as is.
    /// The permit is released on every exit path: normal completion, a panic
    /// inside `f`, or the returned future being dropped.
    pub async fn run<F, Fut>(&self, f: F) -> Result<Fut::Output, AcquireError>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _releaser = self.acquire().await?;
        Ok(f().await)
    }

    /// Like [`run`](Semaphore::run), but gives up if no permit was obtained
    /// within `timeout`.
    ///
    /// On timeout [`AcquireError::Timeout`] is returned and `f` is never
    /// called. The abandoned acquisition leaves the wait queue, so no permit
    /// is lost. The time spent running `f` is not limited.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn run_with_timeout<F, Fut>(
        &self,
        f: F,
        timeout: Duration,
    ) -> Result<Fut::Output, AcquireError>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let releaser = match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(res) => res?,
            Err(_) => {
                debug!("semaphore: no permit within {:?}", timeout);
                return Err(AcquireError::Timeout);
            }
        };
        let output = f().await;
        drop(releaser);
        Ok(output)
    }

    /// Wakes every queued acquirer with a [no-op](Releaser::is_noop)
    /// `Releaser` and restores all permits.
    ///
    /// Permits held at the time of the call stay valid, but releasing them
    /// afterwards has no effect. Meant for shutdown.
    pub fn release_all(&self) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let drained = state.drain(Handoff::Free);
        shared.restore();
        debug!("semaphore: released {} waiters", drained);
    }

    /// Fails every queued acquisition with [`AcquireError::Reset`] and
    /// restores all permits.
    ///
    /// Permits held at the time of the call stay valid, but releasing them
    /// afterwards has no effect.
    pub fn reset(&self) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let drained = state.drain(Handoff::Reset);
        shared.restore();
        debug!("semaphore: reset, {} waiters rejected", drained);
    }
}
