//! Per-operation bridge between the dispatcher and the worker pool.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, trace, warn};

use super::dispatcher::DispatcherShared;
use super::guard::{Admission, OperationGuard};
use super::mutator::StateMutator;
use super::operation::{Operation, RunContext};
use crate::rt::{Job, ThreadPool, WorkerContext};

/// Executes one admitted operation.
///
/// Created by the dispatcher when an operation is queued. The executor owns
/// a handle to the operation, never the reverse.
pub struct OperationExecutor<S> {
    state: Arc<RwLock<S>>,
    operation: Operation<S>,
    dispatcher: Weak<DispatcherShared<S>>,
    collectable: AtomicBool,
}

impl<S> std::fmt::Debug for OperationExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationExecutor")
            .field("operation", &self.operation)
            .field("collectable", &self.is_collectable())
            .finish_non_exhaustive()
    }
}

impl<S> OperationExecutor<S> {
    /// Whether the executor is done and can be dropped.
    #[must_use]
    pub fn is_collectable(&self) -> bool {
        self.collectable.load(Ordering::Acquire)
    }
}

impl<S: Send + Sync + 'static> OperationExecutor<S> {
    pub(crate) const fn new(
        state: Arc<RwLock<S>>,
        operation: Operation<S>,
        dispatcher: Weak<DispatcherShared<S>>,
    ) -> Self {
        Self {
            state,
            operation,
            dispatcher,
            collectable: AtomicBool::new(false),
        }
    }

    /// The operation this executor runs.
    #[must_use]
    pub const fn operation(&self) -> &Operation<S> {
        &self.operation
    }

    /// Evaluates the operation's guards. An interrupted operation must be
    /// canceled. On `MustCancel` the operation is canceled on the spot and
    /// its waiters are woken.
    pub fn check_guard(&self, state: &S) -> Admission {
        let admission = if self.operation.is_interrupted() {
            Admission::MustCancel
        } else {
            self.operation.guards().evaluate(state, &self.operation)
        };
        if admission == Admission::MustCancel {
            self.cancel();
        }
        admission
    }

    /// Cancels an operation that never started.
    pub(crate) fn cancel(&self) {
        debug!(operation_id = %self.operation.id(), "Operation canceled before execution");
        self.operation.complete(true);
        self.collectable.store(true, Ordering::Release);
    }

    /// Runs the operation's `before_execution` mutators.
    pub fn do_pre_execution_state_mutation(&self, state: &mut S) {
        self.operation.mutators().before_execution(state, &self.operation);
    }

    /// Admits the operation: mutates state under the held lock, releases the
    /// lock, then submits to `pool`, blocking for a permit if needed.
    pub fn execute(self: &Arc<Self>, mut state: RwLockWriteGuard<'_, S>, pool: &ThreadPool) {
        self.do_pre_execution_state_mutation(&mut state);
        drop(state);
        pool.run_job(Arc::clone(self).into_job());
    }

    /// Wraps the executor as a pool job.
    pub fn into_job(self: Arc<Self>) -> Job {
        Box::new(move |worker: &WorkerContext<'_>| self.run(worker))
    }

    /// Runs on a worker thread: does the work unless already interrupted,
    /// runs `after_execution`, classifies the outcome and wakes waiters.
    /// A panic in the work or in a mutator cancels the operation.
    pub fn run(self: &Arc<Self>, worker: &WorkerContext<'_>) {
        let op = &self.operation;
        op.mark_started(thread::current().id());
        trace!(operation_id = %op.id(), worker_id = worker.worker_id(), "Operation started");

        let ctx = RunContext::new(op, worker);
        let mut panicked = false;
        if !ctx.is_current_operation_interrupted() {
            if let Some(work) = op.take_runnable() {
                if panic::catch_unwind(AssertUnwindSafe(|| work.run(&ctx))).is_err() {
                    warn!(operation_id = %op.id(), "Operation work panicked");
                    panicked = true;
                }
            }
        }
        let after = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut state = self.state.write();
            op.mutators().after_execution(&mut state, op);
        }));
        if after.is_err() {
            warn!(operation_id = %op.id(), "State mutator panicked after execution");
            panicked = true;
        }
        let canceled = panicked || ctx.is_current_operation_interrupted();

        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.add_expired_executor(Arc::clone(self));
        }

        op.complete(canceled);
        self.collectable.store(true, Ordering::Release);
        debug!(operation_id = %op.id(), canceled, "Operation stopped");
    }

    /// Releases resources held for the operation once the executor expires.
    pub fn cleanup(&self) {
        if self.operation.take_runnable().is_some() {
            trace!(operation_id = %self.operation.id(), "Dropped unrun work");
        }
    }
}
