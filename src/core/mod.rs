//! Operations, admission guards, state mutators and the dispatch machinery
//! that runs them.

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod guard;
pub mod mutator;
pub mod operation;

pub use dispatcher::{DispatchReport, OperationDispatcher};
pub use engine::Engine;
pub use error::{AppResult, Interrupted, KernelError};
pub use executor::OperationExecutor;
pub use guard::{Admission, GuardChain, OperationGuard};
pub use mutator::{FnMutator, MutatorChain, StateMutator};
pub use operation::{Operation, OperationBuilder, OperationId, RunContext, Runnable, WaitStatus};
