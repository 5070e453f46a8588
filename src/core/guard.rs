//! Admission guards.
//!
//! A guard inspects the shared state and answers whether a queued operation
//! may run now, must keep waiting, or must be canceled. Guards compose into
//! a [`GuardChain`]; a single `MustCancel` wins over any number of
//! `MustWait`, and `MustWait` wins over `MayExecute`.

use super::operation::Operation;

/// Result of evaluating a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Admission {
    /// The operation can start immediately.
    MayExecute,
    /// The operation stays queued and is checked again on a later pass.
    MustWait,
    /// The operation is removed from the queue without running.
    MustCancel,
}

/// Predicate over shared state deciding an operation's admission.
///
/// Guards must be total: an unavailable external resource resolves to
/// `MustWait` or `MustCancel`. Guards see the state read-only.
///
/// Any `Fn(&S, &Operation<S>) -> Admission` closure is a guard.
pub trait OperationGuard<S>: Send + Sync {
    /// Decides admission of `op` against `state`.
    fn evaluate(&self, state: &S, op: &Operation<S>) -> Admission;
}

impl<S, F> OperationGuard<S> for F
where
    F: Fn(&S, &Operation<S>) -> Admission + Send + Sync,
{
    fn evaluate(&self, state: &S, op: &Operation<S>) -> Admission {
        self(state, op)
    }
}

/// Ordered composition of guards.
pub struct GuardChain<S> {
    guards: Vec<Box<dyn OperationGuard<S>>>,
}

impl<S> Default for GuardChain<S> {
    fn default() -> Self {
        Self { guards: Vec::new() }
    }
}

impl<S> std::fmt::Debug for GuardChain<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardChain")
            .field("len", &self.guards.len())
            .finish()
    }
}

impl<S> GuardChain<S> {
    /// Adds a guard ahead of (`front`) or behind the existing ones.
    pub fn add(&mut self, guard: Box<dyn OperationGuard<S>>, front: bool) {
        if front {
            self.guards.insert(0, guard);
        } else {
            self.guards.push(guard);
        }
    }

    /// Number of guards in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether the chain has no guards (always admits).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl<S> OperationGuard<S> for GuardChain<S> {
    fn evaluate(&self, state: &S, op: &Operation<S>) -> Admission {
        let mut admission = Admission::MayExecute;
        for guard in &self.guards {
            match guard.evaluate(state, op) {
                Admission::MustCancel => return Admission::MustCancel,
                Admission::MustWait => admission = Admission::MustWait,
                Admission::MayExecute => {}
            }
        }
        admission
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn op() -> Operation<u32> {
        Operation::builder().build()
    }

    fn fixed(admission: Admission) -> Box<dyn OperationGuard<u32>> {
        Box::new(move |_state: &u32, _op: &Operation<u32>| admission)
    }

    #[test]
    fn test_empty_chain_admits() {
        let chain = GuardChain::<u32>::default();
        assert!(chain.is_empty());
        assert_eq!(chain.evaluate(&0, &op()), Admission::MayExecute);
    }

    #[test]
    fn test_wait_dominates_execute() {
        let mut chain = GuardChain::default();
        chain.add(fixed(Admission::MayExecute), false);
        chain.add(fixed(Admission::MustWait), false);
        assert_eq!(chain.evaluate(&0, &op()), Admission::MustWait);
    }

    #[test]
    fn test_cancel_dominates_wait_regardless_of_position() {
        let mut chain = GuardChain::default();
        chain.add(fixed(Admission::MustWait), false);
        chain.add(fixed(Admission::MustCancel), false);
        assert_eq!(chain.evaluate(&0, &op()), Admission::MustCancel);
    }

    #[test]
    fn test_cancel_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            move |_state: &u32, _op: &Operation<u32>| {
                calls.fetch_add(1, Ordering::SeqCst);
                Admission::MayExecute
            }
        };

        let mut chain = GuardChain::default();
        chain.add(Box::new(counted), false);
        chain.add(fixed(Admission::MustCancel), true);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.evaluate(&0, &op()), Admission::MustCancel);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_reads_state() {
        let below_three = |state: &u32, _op: &Operation<u32>| {
            if *state < 3 {
                Admission::MayExecute
            } else {
                Admission::MustWait
            }
        };
        assert_eq!(below_three.evaluate(&2, &op()), Admission::MayExecute);
        assert_eq!(below_three.evaluate(&3, &op()), Admission::MustWait);
    }
}
