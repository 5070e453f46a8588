//! State mutators run immediately before and after an operation executes.
//!
//! These hooks are the only place the shared state is written. Both run
//! under the engine's exclusive state lock, and `after_execution` runs
//! exactly once for every operation whose `before_execution` ran, including
//! operations interrupted mid-run.

use super::operation::Operation;

/// Pre/post execution hooks over the shared state.
pub trait StateMutator<S>: Send + Sync {
    /// Runs while the operation is being admitted.
    fn before_execution(&self, _state: &mut S, _op: &Operation<S>) {}

    /// Runs after the operation's work returned, finished or canceled.
    fn after_execution(&self, _state: &mut S, _op: &Operation<S>) {}
}

/// Mutator built from a pair of closures.
///
/// ```
/// use modest_engine::core::{FnMutator, Operation, StateMutator};
///
/// let mutator = FnMutator::new(
///     |count: &mut u32, _op: &Operation<u32>| *count += 1,
///     |count: &mut u32, _op: &Operation<u32>| *count -= 1,
/// );
/// let op: Operation<u32> = Operation::builder().build();
/// let mut count: u32 = 0;
/// mutator.before_execution(&mut count, &op);
/// assert_eq!(count, 1);
/// mutator.after_execution(&mut count, &op);
/// assert_eq!(count, 0);
/// ```
pub struct FnMutator<B, A> {
    before: B,
    after: A,
}

impl<B, A> FnMutator<B, A> {
    /// Wraps the `before` and `after` hooks.
    #[must_use]
    pub const fn new(before: B, after: A) -> Self {
        Self { before, after }
    }
}

impl<S, B, A> StateMutator<S> for FnMutator<B, A>
where
    B: Fn(&mut S, &Operation<S>) + Send + Sync,
    A: Fn(&mut S, &Operation<S>) + Send + Sync,
{
    fn before_execution(&self, state: &mut S, op: &Operation<S>) {
        (self.before)(state, op);
    }

    fn after_execution(&self, state: &mut S, op: &Operation<S>) {
        (self.after)(state, op);
    }
}

/// Ordered composition of mutators.
///
/// `before_execution` applies mutators front to back; `after_execution`
/// applies them back to front so nested acquire/release pairs unwind
/// symmetrically.
pub struct MutatorChain<S> {
    mutators: Vec<Box<dyn StateMutator<S>>>,
}

impl<S> Default for MutatorChain<S> {
    fn default() -> Self {
        Self {
            mutators: Vec::new(),
        }
    }
}

impl<S> std::fmt::Debug for MutatorChain<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutatorChain")
            .field("len", &self.mutators.len())
            .finish()
    }
}

impl<S> MutatorChain<S> {
    /// Adds a mutator ahead of (`front`) or behind the existing ones.
    pub fn add(&mut self, mutator: Box<dyn StateMutator<S>>, front: bool) {
        if front {
            self.mutators.insert(0, mutator);
        } else {
            self.mutators.push(mutator);
        }
    }

    /// Number of mutators in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mutators.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }
}

impl<S> StateMutator<S> for MutatorChain<S> {
    fn before_execution(&self, state: &mut S, op: &Operation<S>) {
        for mutator in &self.mutators {
            mutator.before_execution(state, op);
        }
    }

    fn after_execution(&self, state: &mut S, op: &Operation<S>) {
        for mutator in self.mutators.iter().rev() {
            mutator.after_execution(state, op);
        }
    }
}
