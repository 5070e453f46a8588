//! # Modest Engine
//!
//! A cooperative operation-scheduling kernel. Callers describe units of
//! work as [`core::Operation`]s, each carrying admission guards and state
//! mutators over one shared, caller-defined state value. The engine admits
//! an operation only when its guards accept the current state, runs it on a
//! bounded pool of reusable worker threads, and lets any thread wait for,
//! or cancel, queued and running work.
//!
//! ## Pieces
//!
//! - **Guards** ([`core::OperationGuard`]) decide `MayExecute`, `MustWait`
//!   or `MustCancel` from a read of the state.
//! - **Mutators** ([`core::StateMutator`]) change the state right before
//!   and right after the work, under the state lock.
//! - **Dispatcher** ([`core::OperationDispatcher`]) re-walks the whole
//!   queue whenever something changes. Admission is not FIFO: a later
//!   operation may start while an earlier one keeps waiting.
//! - **Thread pool** ([`rt::ThreadPool`]) bounds concurrent jobs with a
//!   permit semaphore and recycles idle threads, optionally retiring them
//!   after an idle timeout.
//! - **Engine** ([`core::Engine`]) owns the state, the dispatcher and the
//!   pool.
//!
//! ## Example
//!
//! ```rust
//! use modest_engine::core::{Admission, Engine, FnMutator, Operation, RunContext, WaitStatus};
//!
//! // at most two connections at once
//! let engine = Engine::new(0u32);
//! engine.start().unwrap();
//!
//! let op = Operation::builder()
//!     .runnable(|ctx: &RunContext<'_, u32>| {
//!         if ctx.is_current_operation_interrupted() {
//!             return;
//!         }
//!         // serve the connection
//!     })
//!     .guard(|open: &u32, _op: &Operation<u32>| {
//!         if *open < 2 { Admission::MayExecute } else { Admission::MustWait }
//!     })
//!     .state_mutator(FnMutator::new(
//!         |open: &mut u32, _op: &Operation<u32>| *open += 1,
//!         |open: &mut u32, _op: &Operation<u32>| *open -= 1,
//!     ))
//!     .build();
//!
//! engine.queue(&op).unwrap();
//! assert_eq!(op.wait_for(false, 0), Ok(WaitStatus::Finished));
//! assert_eq!(*engine.state().read(), 0);
//! engine.stop();
//! ```
//!
//! Configuration can come from JSON or `MODEST_*` environment variables;
//! see [`config::EngineConfig`] and [`builders::build_engine`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Operations, guards, mutators, dispatch and the engine facade.
pub mod core;
/// Configuration models for the worker pool and engine.
pub mod config;
/// Builders to construct engines from configuration.
pub mod builders;
/// Threading primitives: permits, interruption and the worker pool.
pub mod rt;
/// Shared utilities.
pub mod util;
