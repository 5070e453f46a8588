//! Dispatch loop: re-evaluates every queued operation against the shared
//! state whenever something changed.
//!
//! Admission is not FIFO. The queue is walked front to back on each pass and
//! any operation whose guards admit it may start, even while operations
//! ahead of it keep waiting. The whole walk holds the state write lock, so
//! guards in one pass see a single consistent state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::error::KernelError;
use super::executor::OperationExecutor;
use super::guard::Admission;
use super::operation::{Operation, OperationId};
use crate::rt::{ThreadPool, Wake};

/// Summary of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Operations handed to the pool.
    pub admitted: usize,
    /// Operations removed from the queue as canceled.
    pub canceled: usize,
    /// Operations left in the queue.
    pub waiting: usize,
}

struct Queues<S> {
    /// Cleared by shutdown; checked before every push.
    accepting: bool,
    queued: VecDeque<Arc<OperationExecutor<S>>>,
    running: HashMap<OperationId, Arc<OperationExecutor<S>>>,
    expired: Vec<Arc<OperationExecutor<S>>>,
}

#[derive(Debug)]
struct DispatchSignal {
    /// Something changed since the last pass.
    dispatch: bool,
    /// The background loop should keep going.
    running: bool,
}

pub(crate) struct DispatcherShared<S> {
    state: Arc<RwLock<S>>,
    pool: Arc<ThreadPool>,
    queues: Mutex<Queues<S>>,
    signal: Mutex<DispatchSignal>,
    wakeup: Condvar,
}

impl<S: Send + Sync> Wake for DispatcherShared<S> {
    fn wake(&self) {
        self.trigger();
    }
}

impl<S> DispatcherShared<S> {
    /// Requests another pass.
    fn trigger(&self) {
        self.signal.lock().dispatch = true;
        self.wakeup.notify_all();
    }
}

impl<S: Send + Sync + 'static> DispatcherShared<S> {
    /// Called by an executor once its operation stopped.
    pub(crate) fn add_expired_executor(&self, executor: Arc<OperationExecutor<S>>) {
        {
            let mut queues = self.queues.lock();
            queues.running.remove(&executor.operation().id());
            queues.expired.push(executor);
        }
        self.trigger();
    }

    fn dispatch_pass(&self) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut blocked = None;
        {
            let mut state = self.state.write();
            let mut queues = self.queues.lock();
            self.signal.lock().dispatch = false;

            let mut i = 0;
            while i < queues.queued.len() {
                match queues.queued[i].check_guard(&state) {
                    Admission::MayExecute => {
                        let Some(executor) = queues.queued.remove(i) else {
                            break;
                        };
                        executor.do_pre_execution_state_mutation(&mut state);
                        queues
                            .running
                            .insert(executor.operation().id(), Arc::clone(&executor));
                        report.admitted += 1;
                        trace!(operation_id = %executor.operation().id(), "Operation admitted");

                        if let Err(job) = self.pool.try_run_job(executor.into_job()) {
                            // no free permit: submit outside the state lock
                            blocked = Some(job);
                            break;
                        }
                    }
                    Admission::MustWait => i += 1,
                    Admission::MustCancel => {
                        if let Some(executor) = queues.queued.remove(i) {
                            queues.expired.push(executor);
                        }
                        report.canceled += 1;
                    }
                }
            }
            report.waiting = queues.queued.len();

            if report.admitted > 0 || report.canceled > 0 {
                self.signal.lock().dispatch = true;
            }
        }

        if let Some(job) = blocked {
            trace!("Waiting for a thread permit");
            self.pool.run_job(job);
        }
        self.cleanup_expired_executors();

        if report != DispatchReport::default() {
            debug!(
                admitted = report.admitted,
                canceled = report.canceled,
                waiting = report.waiting,
                "Dispatch pass complete"
            );
        }
        report
    }

    fn cleanup_expired_executors(&self) {
        let expired = std::mem::take(&mut self.queues.lock().expired);
        for executor in expired {
            executor.cleanup();
        }
    }

    fn run_loop(&self) {
        loop {
            {
                let mut signal = self.signal.lock();
                while signal.running && !signal.dispatch {
                    self.wakeup.wait(&mut signal);
                }
                if !signal.running {
                    break;
                }
            }
            self.dispatch_pass();
        }
        trace!("Dispatch loop exited");
    }
}

/// Owns the queue of not-yet-running operations and the background thread
/// that runs dispatch passes.
pub struct OperationDispatcher<S: Send + Sync + 'static> {
    shared: Arc<DispatcherShared<S>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + Sync + 'static> std::fmt::Debug for OperationDispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.shared.queues.lock();
        f.debug_struct("OperationDispatcher")
            .field("queued", &queues.queued.len())
            .field("running", &queues.running.len())
            .field("dispatching", &self.thread.lock().is_some())
            .finish()
    }
}

impl<S: Send + Sync + 'static> OperationDispatcher<S> {
    /// Creates a dispatcher over `state` that runs operations on `pool`.
    #[must_use]
    pub fn new(state: Arc<RwLock<S>>, pool: Arc<ThreadPool>) -> Self {
        Self {
            shared: Arc::new(DispatcherShared {
                state,
                pool,
                queues: Mutex::new(Queues {
                    accepting: true,
                    queued: VecDeque::new(),
                    running: HashMap::new(),
                    expired: Vec::new(),
                }),
                signal: Mutex::new(DispatchSignal {
                    dispatch: false,
                    running: false,
                }),
                wakeup: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Appends `op` to the queue and requests a pass.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EngineStopped`] after [`shutdown`](Self::shutdown)
    /// until dispatching starts again, or [`KernelError::AlreadyQueued`] if
    /// `op` was queued before.
    pub fn queue_operation(&self, op: &Operation<S>) -> Result<(), KernelError> {
        {
            let mut queues = self.shared.queues.lock();
            if !queues.accepting {
                return Err(KernelError::EngineStopped);
            }
            if !op.mark_queued() {
                return Err(KernelError::AlreadyQueued(op.id()));
            }
            let hook: Weak<dyn Wake> = Arc::downgrade(&self.shared) as Weak<dyn Wake>;
            op.set_dispatch_hook(hook);
            queues.queued.push_back(Arc::new(OperationExecutor::new(
                Arc::clone(&self.shared.state),
                op.clone(),
                Arc::downgrade(&self.shared),
            )));
        }
        trace!(operation_id = %op.id(), "Operation queued");
        self.shared.trigger();
        Ok(())
    }

    /// Runs one pass over the queue on the calling thread.
    ///
    /// Every queued operation is checked in queue order. Admissible ones
    /// start while pool permits are free; the first admissible operation
    /// that finds no free permit is submitted with a blocking acquire after
    /// the state lock is released, and ends the pass. Canceled operations
    /// are dropped from the queue, waiting ones stay.
    pub fn dispatch_pass(&self) -> DispatchReport {
        self.shared.dispatch_pass()
    }

    /// Starts the background thread that runs a pass whenever operations
    /// are queued, complete, or are interrupted, and reopens the queue after
    /// a shutdown. Does nothing if already started.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ThreadSpawn`] if the thread cannot be created.
    pub fn start_dispatching(&self) -> Result<(), KernelError> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }
        self.shared.queues.lock().accepting = true;
        {
            let mut signal = self.shared.signal.lock();
            signal.running = true;
            signal.dispatch = true;
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("modest-dispatcher".into())
            .spawn(move || shared.run_loop())
            .map_err(|e| {
                self.shared.signal.lock().running = false;
                KernelError::ThreadSpawn(e.to_string())
            })?;
        *thread = Some(handle);
        info!("Dispatcher started");
        Ok(())
    }

    /// Stops the background thread, waiting for an in-progress pass.
    pub fn stop_dispatching(&self) {
        {
            let mut signal = self.shared.signal.lock();
            signal.running = false;
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("Dispatcher thread panicked");
            }
            info!("Dispatcher stopped");
        }
        self.shared.cleanup_expired_executors();
    }

    /// Closes the queue, stops dispatching, cancels queued operations and
    /// terminates running ones. Later calls to
    /// [`queue_operation`](Self::queue_operation) fail until
    /// [`start_dispatching`](Self::start_dispatching) is called again.
    pub fn shutdown(&self) {
        self.shared.queues.lock().accepting = false;
        // a pass may be blocked on a permit held by a running operation
        self.interrupt_running_operations();
        self.stop_dispatching();
        self.clear_queued_operations();
        self.terminate_running_operations();
    }

    /// Whether new operations are accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.shared.queues.lock().accepting
    }

    /// Whether the background thread is running.
    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Cancels every queued operation.
    pub fn clear_queued_operations(&self) {
        let drained: Vec<_> = {
            let mut queues = self.shared.queues.lock();
            let drained: Vec<_> = queues.queued.drain(..).collect();
            for executor in &drained {
                executor.cancel();
            }
            drained
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "Canceled queued operations");
        }
        self.shared.queues.lock().expired.extend(drained);
        self.shared.cleanup_expired_executors();
    }

    fn running_operations(&self) -> Vec<Operation<S>> {
        self.shared
            .queues
            .lock()
            .running
            .values()
            .map(|executor| executor.operation().clone())
            .collect()
    }

    /// Interrupts every running operation without waiting for it.
    pub fn interrupt_running_operations(&self) {
        for op in self.running_operations() {
            op.interrupt();
        }
    }

    /// Interrupts every running operation and waits for each to stop.
    pub fn terminate_running_operations(&self) {
        let running = self.running_operations();
        for op in &running {
            op.interrupt();
        }
        for op in &running {
            let _ = op.wait_for(false, 0);
        }
        if !running.is_empty() {
            debug!(count = running.len(), "Terminated running operations");
        }
        self.shared.cleanup_expired_executors();
    }

    /// Reclaims executors whose operations stopped.
    pub fn cleanup_expired_executors(&self) {
        self.shared.cleanup_expired_executors();
    }

    /// Operations waiting for admission.
    #[must_use]
    pub fn queued_operation_count(&self) -> usize {
        self.shared.queues.lock().queued.len()
    }

    /// Operations admitted and not yet stopped.
    #[must_use]
    pub fn running_operation_count(&self) -> usize {
        self.shared.queues.lock().running.len()
    }

    /// Queued plus running operations.
    #[must_use]
    pub fn total_operation_count(&self) -> usize {
        let queues = self.shared.queues.lock();
        queues.queued.len() + queues.running.len()
    }

    /// The pool operations run on.
    #[must_use]
    pub fn thread_pool(&self) -> &ThreadPool {
        &self.shared.pool
    }
}

impl<S: Send + Sync + 'static> Drop for OperationDispatcher<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
