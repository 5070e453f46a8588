//! Cooperative per-thread interruption.
//!
//! Rust threads cannot be interrupted out of a blocking call, so every thread
//! that takes part in the kernel carries an [`Interrupter`]: a shared flag
//! plus a weak link to whatever the thread is currently blocked on. Setting
//! the flag wakes that blocker so the thread can observe the interruption.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Something a blocked thread can be woken from.
///
/// Implementors must take the lock their waiters sleep under before
/// notifying, otherwise a wake-up racing with the waiter's flag check is lost.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

#[derive(Default)]
struct InterruptState {
    flag: AtomicBool,
    blocked_on: Mutex<Option<Weak<dyn Wake>>>,
}

thread_local! {
    static CURRENT: RefCell<Option<Interrupter>> = const { RefCell::new(None) };
}

/// Interruption token for one thread.
///
/// ```
/// use modest_engine::rt::Interrupter;
///
/// let me = Interrupter::current();
/// assert!(!me.is_interrupted());
/// me.interrupt();
/// assert!(Interrupter::interrupted());
/// assert!(!me.is_interrupted());
/// ```
#[derive(Clone, Default)]
pub struct Interrupter {
    inner: Arc<InterruptState>,
}

impl std::fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupter")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

impl Interrupter {
    /// Creates a detached token, not yet bound to any thread.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the token of the calling thread, creating it on first use.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(|current| current.borrow_mut().get_or_insert_with(Self::new).clone())
    }

    /// Tests and clears the calling thread's interruption flag.
    #[must_use]
    pub fn interrupted() -> bool {
        Self::current().clear()
    }

    /// Binds this token to the calling thread.
    pub(crate) fn install_current(&self) {
        CURRENT.with(|current| *current.borrow_mut() = Some(self.clone()));
    }

    /// Flags the owning thread as interrupted and wakes it if it is blocked
    /// in an interruptible wait.
    pub fn interrupt(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        let target = self.inner.blocked_on.lock().as_ref().and_then(Weak::upgrade);
        if let Some(target) = target {
            target.wake();
        }
    }

    /// Whether the owning thread has a pending interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Clears the flag, returning its previous value.
    pub fn clear(&self) -> bool {
        self.inner.flag.swap(false, Ordering::SeqCst)
    }

    /// Records what the owning thread is about to block on until the
    /// returned guard drops.
    pub(crate) fn block_on(&self, target: Weak<dyn Wake>) -> BlockedOn<'_> {
        *self.inner.blocked_on.lock() = Some(target);
        BlockedOn { owner: self }
    }
}

pub(crate) struct BlockedOn<'a> {
    owner: &'a Interrupter,
}

impl Drop for BlockedOn<'_> {
    fn drop(&mut self) {
        *self.owner.inner.blocked_on.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Condvar;
    use std::thread;
    use std::time::Duration;

    struct Gate {
        open: Mutex<bool>,
        cond: Condvar,
    }

    impl Wake for Gate {
        fn wake(&self) {
            let _open = self.open.lock();
            self.cond.notify_all();
        }
    }

    #[test]
    fn test_current_is_stable_per_thread() {
        let a = Interrupter::current();
        let b = Interrupter::current();
        a.interrupt();
        assert!(b.is_interrupted());
        assert!(b.clear());
        assert!(!a.is_interrupted());
    }

    #[test]
    fn test_threads_have_distinct_tokens() {
        let here = Interrupter::current();
        let there = thread::spawn(Interrupter::current).join().unwrap();
        there.interrupt();
        assert!(!here.is_interrupted());
    }

    #[test]
    fn test_interrupt_wakes_blocked_thread() {
        let gate = Arc::new(Gate {
            open: Mutex::new(false),
            cond: Condvar::new(),
        });
        let (tx, rx) = std::sync::mpsc::channel();

        let handle = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let me = Interrupter::current();
                tx.send(me.clone()).unwrap();
                let target: Weak<dyn Wake> = Arc::downgrade(&gate) as Weak<dyn Wake>;
                let _blocked = me.block_on(target);
                let mut open = gate.open.lock();
                while !*open && !me.is_interrupted() {
                    gate.cond.wait(&mut open);
                }
                me.is_interrupted()
            })
        };

        let token = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        token.interrupt();
        assert!(handle.join().unwrap());
    }
}
