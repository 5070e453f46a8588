//! Operations and their lifecycle.
//!
//! An [`Operation`] is a cheaply cloneable handle: the caller, the
//! dispatcher and the executor each hold one, and the work is released when
//! the last handle drops. Guards, mutators and user data are fixed by the
//! [`OperationBuilder`] before the operation can be queued.
//!
//! Lifecycle: `Created -> Queued -> Running -> Finished`, with
//! `Queued -> Canceled` when a guard (or an interrupt) cancels it and
//! `Running -> Canceled` when the work returns after an interrupt.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;
use uuid::Uuid;

use super::error::Interrupted;
use super::guard::{GuardChain, OperationGuard};
use super::mutator::{MutatorChain, StateMutator};
use crate::rt::{Interrupter, Wake, WorkerContext};

/// Unique operation identity.
pub type OperationId = Uuid;

/// The work of an operation. Runs at most once, on a pooled thread.
///
/// Implementations must poll
/// [`RunContext::is_current_operation_interrupted`] and return promptly once
/// it reports true.
pub trait Runnable<S>: Send {
    /// Performs the work.
    fn run(self: Box<Self>, ctx: &RunContext<'_, S>);
}

impl<S, F> Runnable<S> for F
where
    F: FnOnce(&RunContext<'_, S>) + Send,
{
    fn run(self: Box<Self>, ctx: &RunContext<'_, S>) {
        (*self)(ctx);
    }
}

/// Context handed to a running operation's work.
pub struct RunContext<'a, S> {
    operation: &'a Operation<S>,
    worker: &'a WorkerContext<'a>,
}

impl<'a, S> RunContext<'a, S> {
    pub(crate) const fn new(operation: &'a Operation<S>, worker: &'a WorkerContext<'a>) -> Self {
        Self { operation, worker }
    }

    /// True once the operation, or the pooled thread running it, has been
    /// interrupted.
    #[must_use]
    pub fn is_current_operation_interrupted(&self) -> bool {
        self.operation.is_interrupted() || self.worker.is_interrupted()
    }

    /// The operation being run.
    #[must_use]
    pub const fn operation(&self) -> &Operation<S> {
        self.operation
    }

    /// Pool-local id of the worker thread.
    #[must_use]
    pub fn worker_id(&self) -> usize {
        self.worker.worker_id()
    }
}

/// How a [`Operation::wait_for`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The operation ran to completion.
    Finished,
    /// The operation was canceled, queued or running.
    Canceled,
    /// The timeout elapsed first; the operation is still queued or running.
    TimedOut,
}

#[derive(Debug, Default, Clone, Copy)]
struct Lifecycle {
    started: bool,
    finished: bool,
    canceled: bool,
    worker: Option<ThreadId>,
}

impl Lifecycle {
    const fn outcome(&self) -> Option<WaitStatus> {
        if self.finished {
            Some(WaitStatus::Finished)
        } else if self.canceled {
            Some(WaitStatus::Canceled)
        } else {
            None
        }
    }
}

struct OperationInner<S> {
    id: OperationId,
    runnable: Mutex<Option<Box<dyn Runnable<S>>>>,
    guards: GuardChain<S>,
    mutators: MutatorChain<S>,
    user_data: Option<Box<dyn Any + Send + Sync>>,
    interrupted: AtomicBool,
    queued: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    stopped: Condvar,
    dispatch_hook: Mutex<Option<Weak<dyn Wake>>>,
}

impl<S> Wake for OperationInner<S> {
    fn wake(&self) {
        let _life = self.lifecycle.lock();
        self.stopped.notify_all();
    }
}

/// Shared handle to a scheduled unit of work.
pub struct Operation<S> {
    inner: Arc<OperationInner<S>>,
}

impl<S> Clone for Operation<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> PartialEq for Operation<S> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<S> Eq for Operation<S> {}

impl<S> std::fmt::Debug for Operation<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let life = *self.inner.lifecycle.lock();
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("started", &life.started)
            .field("interrupted", &self.is_interrupted())
            .field("finished", &life.finished)
            .field("canceled", &life.canceled)
            .finish_non_exhaustive()
    }
}

impl<S: 'static> Operation<S> {
    /// Creates an operation with no guards or mutators that runs `work`.
    #[must_use]
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&RunContext<'_, S>) + Send + 'static,
    {
        OperationBuilder::new().runnable(work).build()
    }

    /// Starts building an operation.
    #[must_use]
    pub fn builder() -> OperationBuilder<S> {
        OperationBuilder::new()
    }

    /// Blocks until the operation finishes or is canceled.
    ///
    /// `timeout_ms == 0` waits indefinitely. If `interruptible`, an
    /// interruption of the calling thread (see [`Interrupter`]) ends the wait
    /// early; otherwise the wait runs to completion and the interruption is
    /// reported afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] when the calling thread was interrupted.
    pub fn wait_for(&self, interruptible: bool, timeout_ms: u32) -> Result<WaitStatus, Interrupted> {
        let caller = Interrupter::current();
        let deadline = (timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(u64::from(timeout_ms)));
        let target: Weak<dyn Wake> = Arc::downgrade(&self.inner) as Weak<dyn Wake>;
        let _blocked = caller.block_on(target);

        let mut life = self.inner.lifecycle.lock();
        let status = loop {
            if let Some(status) = life.outcome() {
                break status;
            }
            if interruptible && caller.is_interrupted() {
                return Err(Interrupted);
            }
            match deadline {
                None => self.inner.stopped.wait(&mut life),
                Some(deadline) => {
                    if self.inner.stopped.wait_until(&mut life, deadline).timed_out() {
                        break life.outcome().unwrap_or(WaitStatus::TimedOut);
                    }
                }
            }
        };
        drop(life);

        if caller.is_interrupted() {
            return Err(Interrupted);
        }
        Ok(status)
    }

    /// Waits from async code by parking a blocking-pool thread on the
    /// operation. A zero `timeout` waits indefinitely. Dropping the future
    /// does not stop the underlying wait before `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the blocking wait could not complete.
    #[cfg(feature = "tokio-runtime")]
    pub async fn wait_async(&self, timeout: Duration) -> Result<WaitStatus, Interrupted> {
        let op = self.clone();
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        tokio::task::spawn_blocking(move || op.wait_for(true, timeout_ms))
            .await
            .unwrap_or(Err(Interrupted))
    }

    pub(crate) fn set_dispatch_hook(&self, hook: Weak<dyn Wake>) {
        *self.inner.dispatch_hook.lock() = Some(hook);
    }
}

impl<S> Operation<S> {
    /// Unique id of this operation.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    /// Interrupts the operation. Idempotent.
    ///
    /// A queued operation is canceled on the next dispatch pass; a running
    /// one observes the flag through its [`RunContext`].
    pub fn interrupt(&self) {
        if self.inner.interrupted.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!(operation_id = %self.inner.id, "Operation interrupted");
        if self.started() {
            return;
        }
        let hook = self.inner.dispatch_hook.lock().as_ref().and_then(Weak::upgrade);
        if let Some(hook) = hook {
            hook.wake();
        }
    }

    /// Whether [`interrupt`](Self::interrupt) has been called.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// Whether a worker thread has picked the operation up.
    #[must_use]
    pub fn started(&self) -> bool {
        self.inner.lifecycle.lock().started
    }

    /// Whether the operation reached a terminal state.
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.inner.lifecycle.lock().outcome().is_some()
    }

    /// Whether the operation ran to completion without interruption.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.inner.lifecycle.lock().finished
    }

    /// Whether the operation was canceled.
    #[must_use]
    pub fn canceled(&self) -> bool {
        self.inner.lifecycle.lock().canceled
    }

    /// The worker thread the operation ran on, once started.
    #[must_use]
    pub fn worker_thread(&self) -> Option<ThreadId> {
        self.inner.lifecycle.lock().worker
    }

    /// Whether the operation carries work (it may exist only to mutate
    /// state).
    #[must_use]
    pub fn has_runnable(&self) -> bool {
        self.inner.runnable.lock().is_some()
    }

    /// Caller bookkeeping attached at build time, if it has type `T`.
    #[must_use]
    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.inner
            .user_data
            .as_deref()
            .and_then(|data| data.downcast_ref::<T>())
    }

    pub(crate) fn guards(&self) -> &GuardChain<S> {
        &self.inner.guards
    }

    pub(crate) fn mutators(&self) -> &MutatorChain<S> {
        &self.inner.mutators
    }

    /// Marks the operation as handed to a dispatcher; false if it already was.
    pub(crate) fn mark_queued(&self) -> bool {
        !self.inner.queued.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_started(&self, worker: ThreadId) {
        let mut life = self.inner.lifecycle.lock();
        life.started = true;
        life.worker = Some(worker);
    }

    pub(crate) fn take_runnable(&self) -> Option<Box<dyn Runnable<S>>> {
        self.inner.runnable.lock().take()
    }

    /// Moves the operation to its terminal state and wakes every waiter.
    pub(crate) fn complete(&self, canceled: bool) {
        let mut life = self.inner.lifecycle.lock();
        if life.outcome().is_some() {
            return;
        }
        if canceled {
            life.canceled = true;
        } else {
            life.finished = true;
        }
        self.inner.stopped.notify_all();
    }
}

/// Assembles an [`Operation`]. Guards and mutators can only be added here,
/// so they are fixed before the operation is queued.
pub struct OperationBuilder<S> {
    runnable: Option<Box<dyn Runnable<S>>>,
    guards: GuardChain<S>,
    mutators: MutatorChain<S>,
    user_data: Option<Box<dyn Any + Send + Sync>>,
}

impl<S> Default for OperationBuilder<S> {
    fn default() -> Self {
        Self {
            runnable: None,
            guards: GuardChain::default(),
            mutators: MutatorChain::default(),
            user_data: None,
        }
    }
}

impl<S: 'static> OperationBuilder<S> {
    /// Empty builder: no work, no guards, no mutators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the work from a closure.
    #[must_use]
    pub fn runnable<F>(mut self, work: F) -> Self
    where
        F: FnOnce(&RunContext<'_, S>) + Send + 'static,
    {
        self.runnable = Some(Box::new(work));
        self
    }

    /// Sets the work from any [`Runnable`] implementation.
    #[must_use]
    pub fn runnable_object<R: Runnable<S> + 'static>(mut self, work: R) -> Self {
        self.runnable = Some(Box::new(work));
        self
    }

    /// Adds a guard in front of (`front`) or behind the existing ones.
    #[must_use]
    pub fn add_guard<G: OperationGuard<S> + 'static>(mut self, guard: G, front: bool) -> Self {
        self.guards.add(Box::new(guard), front);
        self
    }

    /// Adds a guard in front of the existing ones.
    #[must_use]
    pub fn guard<G: OperationGuard<S> + 'static>(self, guard: G) -> Self {
        self.add_guard(guard, true)
    }

    /// Adds a state mutator in front of (`front`) or behind the existing ones.
    #[must_use]
    pub fn add_state_mutator<M: StateMutator<S> + 'static>(mut self, mutator: M, front: bool) -> Self {
        self.mutators.add(Box::new(mutator), front);
        self
    }

    /// Adds a state mutator in front of the existing ones.
    #[must_use]
    pub fn state_mutator<M: StateMutator<S> + 'static>(self, mutator: M) -> Self {
        self.add_state_mutator(mutator, true)
    }

    /// Attaches caller bookkeeping, readable via [`Operation::user_data`].
    #[must_use]
    pub fn user_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.user_data = Some(Box::new(data));
        self
    }

    /// Finalizes the operation.
    #[must_use]
    pub fn build(self) -> Operation<S> {
        Operation {
            inner: Arc::new(OperationInner {
                id: Uuid::new_v4(),
                runnable: Mutex::new(self.runnable),
                guards: self.guards,
                mutators: self.mutators,
                user_data: self.user_data,
                interrupted: AtomicBool::new(false),
                queued: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::default()),
                stopped: Condvar::new(),
                dispatch_hook: Mutex::new(None),
            }),
        }
    }
}
