//! A reusable worker thread owned by a [`ThreadPool`](super::ThreadPool).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::interrupt::Interrupter;
use super::thread_pool::PoolShared;

/// A unit of work handed to a pooled thread.
pub type Job = Box<dyn FnOnce(&WorkerContext<'_>) + Send + 'static>;

/// What a job can see of the thread running it.
pub struct WorkerContext<'a> {
    thread: &'a PooledThread,
}

impl WorkerContext<'_> {
    /// True once the pool has interrupted this thread (shrink or shutdown).
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.thread.is_interrupted()
    }

    /// Pool-local sequence number of the thread.
    #[must_use]
    pub fn worker_id(&self) -> usize {
        self.thread.id
    }

    /// The interruption token of the running thread.
    #[must_use]
    pub fn interrupter(&self) -> &Interrupter {
        &self.thread.interrupter
    }
}

pub(crate) struct JobSlot {
    job: Option<Job>,
    expired: bool,
}

impl JobSlot {
    pub(crate) const fn is_expired(&self) -> bool {
        self.expired
    }

    pub(crate) fn assign(&mut self, job: Job) {
        self.job = Some(job);
    }
}

/// Worker thread that runs jobs one at a time and parks while idle.
///
/// The job slot lock doubles as the idle/expired lock: the pool holds it
/// while deciding whether the thread can take a job, and the thread holds it
/// while deciding whether to go idle or expire, so a job is never assigned to
/// a thread that is on its way out.
pub struct PooledThread {
    id: usize,
    slot: Mutex<JobSlot>,
    cond: Condvar,
    interrupter: Interrupter,
    expire_ms: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PooledThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledThread")
            .field("id", &self.id)
            .field("interrupted", &self.is_interrupted())
            .field("expire_ms", &self.expire_time())
            .finish_non_exhaustive()
    }
}

impl PooledThread {
    /// Creates an unstarted thread that will run `job` first.
    pub(crate) fn new(id: usize, expire_ms: u64, job: Job) -> Self {
        Self {
            id,
            slot: Mutex::new(JobSlot {
                job: Some(job),
                expired: false,
            }),
            cond: Condvar::new(),
            interrupter: Interrupter::new(),
            expire_ms: AtomicU64::new(expire_ms),
            handle: Mutex::new(None),
        }
    }

    /// Pool-local sequence number.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Locks the job slot.
    pub(crate) fn job_lock(&self) -> MutexGuard<'_, JobSlot> {
        self.slot.lock()
    }

    /// Wakes the thread after a job was placed in its slot.
    pub(crate) fn notify_job(&self) {
        self.cond.notify_one();
    }

    /// Whether the thread has expired from idling too long.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.slot.lock().expired
    }

    /// Whether the thread has been interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupter.is_interrupted()
    }

    /// Interrupts the thread; an idle thread exits immediately, a busy one
    /// exits after its current job.
    pub fn interrupt(&self) {
        self.interrupter.interrupt();
        let _slot = self.slot.lock();
        self.cond.notify_all();
    }

    /// Idle milliseconds before the thread expires, 0 for never.
    #[must_use]
    pub fn expire_time(&self) -> u64 {
        self.expire_ms.load(Ordering::Relaxed)
    }

    /// Changes the idle expiration; an idle thread restarts its wait.
    pub fn set_expire_time(&self, expire_ms: u64) {
        self.expire_ms.store(expire_ms, Ordering::Relaxed);
        let _slot = self.slot.lock();
        self.cond.notify_all();
    }

    /// OS thread id, once started.
    #[must_use]
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.handle.lock().as_ref().map(|h| h.thread().id())
    }

    /// Spawns the OS thread.
    pub(crate) fn start(
        self: &Arc<Self>,
        stack_size: usize,
        pool: Weak<PoolShared>,
    ) -> std::io::Result<()> {
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("modest-worker-{}", self.id))
            .stack_size(stack_size)
            .spawn(move || this.run(&pool))?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Joins the OS thread unless called from that very thread.
    pub(crate) fn join(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(worker_id = self.id, "Worker thread panicked");
        } else {
            trace!(worker_id = self.id, "Worker thread joined");
        }
    }

    fn run(self: Arc<Self>, pool: &Weak<PoolShared>) {
        self.interrupter.install_current();
        debug!(worker_id = self.id, "Worker thread started");

        while let Some(job) = self.next_job() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                job(&WorkerContext {
                    thread: self.as_ref(),
                });
            }));

            let Some(pool) = pool.upgrade() else {
                break;
            };
            if outcome.is_err() {
                warn!(worker_id = self.id, "Job panicked, retiring worker thread");
                self.slot.lock().expired = true;
                pool.job_abandoned();
                break;
            }
            pool.job_completed(&self);
        }

        if let Some(pool) = pool.upgrade() {
            pool.thread_exited(&self);
        }
        debug!(worker_id = self.id, "Worker thread exiting");
    }

    /// Waits for the next job, or returns `None` once interrupted or expired.
    fn next_job(&self) -> Option<Job> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(job) = slot.job.take() {
                return Some(job);
            }
            if self.interrupter.is_interrupted() {
                slot.expired = true;
                return None;
            }

            let expire_ms = self.expire_ms.load(Ordering::Relaxed);
            if expire_ms == 0 {
                self.cond.wait(&mut slot);
            } else if self
                .cond
                .wait_for(&mut slot, Duration::from_millis(expire_ms))
                .timed_out()
                && slot.job.is_none()
            {
                slot.expired = true;
                debug!(worker_id = self.id, expire_ms, "Idle worker thread expired");
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Job {
        Box::new(|_ctx: &WorkerContext<'_>| {})
    }

    #[test]
    fn test_new_thread_holds_its_first_job() {
        let t = PooledThread::new(7, 0, noop());
        assert_eq!(t.id(), 7);
        assert!(t.job_lock().job.is_some());
        assert!(!t.is_expired());
        assert!(!t.is_interrupted());
        assert!(t.thread_id().is_none());
    }

    #[test]
    fn test_interrupted_thread_gives_up_when_idle() {
        let t = PooledThread::new(1, 0, noop());
        assert!(t.next_job().is_some());
        t.interrupt();
        assert!(t.next_job().is_none());
        assert!(t.is_expired());
    }

    #[test]
    fn test_idle_thread_expires() {
        let t = PooledThread::new(1, 20, noop());
        assert!(t.next_job().is_some());
        assert!(t.next_job().is_none());
        assert!(t.is_expired());
    }

    #[test]
    fn test_set_expire_time() {
        let t = PooledThread::new(1, 0, noop());
        t.set_expire_time(250);
        assert_eq!(t.expire_time(), 250);
    }
}
