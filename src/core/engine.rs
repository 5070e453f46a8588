//! Top-level facade tying the shared state, the dispatcher and the worker
//! pool together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::dispatcher::OperationDispatcher;
use super::error::KernelError;
use super::operation::Operation;
use crate::config::EngineConfig;
use crate::rt::ThreadPool;

/// Owns one state value of type `S` and schedules operations against it.
///
/// Operations may be queued before [`Engine::start`]; they are evaluated
/// once dispatching starts.
///
/// ```
/// use modest_engine::core::{Admission, Engine, Operation, RunContext, WaitStatus};
///
/// let engine = Engine::new(0u32);
/// engine.start().unwrap();
///
/// let op = Operation::builder()
///     .runnable(|_ctx: &RunContext<'_, u32>| {})
///     .guard(|open: &u32, _op: &Operation<u32>| {
///         if *open < 4 { Admission::MayExecute } else { Admission::MustWait }
///     })
///     .build();
/// engine.queue(&op).unwrap();
/// assert_eq!(op.wait_for(false, 1000), Ok(WaitStatus::Finished));
/// engine.stop();
/// ```
pub struct Engine<S: Send + Sync + 'static> {
    state: Arc<RwLock<S>>,
    pool: Arc<ThreadPool>,
    dispatcher: OperationDispatcher<S>,
    stopped: AtomicBool,
}

impl<S: Send + Sync + 'static> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pool", &self.pool)
            .field("dispatcher", &self.dispatcher)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<S: Send + Sync + 'static> Engine<S> {
    /// Creates an engine over `state` with the default configuration.
    #[must_use]
    pub fn new(state: S) -> Self {
        let pool = ThreadPool::from_config(&EngineConfig::default().thread_pool);
        Self::assemble(state, pool)
    }

    /// Creates an engine over `state` from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidConfig`] if `config` does not validate.
    pub fn with_config(config: &EngineConfig, state: S) -> Result<Self, KernelError> {
        config.validate().map_err(KernelError::InvalidConfig)?;
        Ok(Self::assemble(state, ThreadPool::from_config(&config.thread_pool)))
    }

    fn assemble(state: S, pool: ThreadPool) -> Self {
        let state = Arc::new(RwLock::new(state));
        let pool = Arc::new(pool);
        let dispatcher = OperationDispatcher::new(Arc::clone(&state), Arc::clone(&pool));
        Self {
            state,
            pool,
            dispatcher,
            stopped: AtomicBool::new(false),
        }
    }

    /// Submits `op` for admission. A submission racing with
    /// [`Engine::stop`] is either rejected or canceled by it.
    ///
    /// # Errors
    ///
    /// [`KernelError::EngineStopped`] after [`Engine::stop`], or
    /// [`KernelError::AlreadyQueued`] if `op` was submitted before.
    pub fn queue(&self, op: &Operation<S>) -> Result<(), KernelError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(KernelError::EngineStopped);
        }
        self.dispatcher.queue_operation(op)
    }

    /// Starts dispatching. Also reopens an engine that was stopped.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ThreadSpawn`] if the dispatcher thread cannot
    /// be created.
    pub fn start(&self) -> Result<(), KernelError> {
        self.dispatcher.start_dispatching()?;
        self.stopped.store(false, Ordering::Release);
        info!(pool_size = self.pool.pool_size(), "Engine started");
        Ok(())
    }

    /// Stops dispatching, cancels queued operations, interrupts running ones
    /// and waits for them, then terminates the pool threads.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dispatcher.shutdown();
        self.pool.terminate_all();
        info!("Engine stopped");
    }

    /// Whether [`Engine::stop`] was called since the last start.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// The shared state, for inspection outside guards and mutators.
    /// Changes must go through state mutators.
    #[must_use]
    pub fn state(&self) -> &RwLock<S> {
        &self.state
    }

    /// The worker pool.
    #[must_use]
    pub fn thread_pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// The dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &OperationDispatcher<S> {
        &self.dispatcher
    }
}

impl<S: Send + Sync + 'static> Drop for Engine<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
