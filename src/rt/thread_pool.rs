//! Bounded pool of lazily created, reusable worker threads.
//!
//! Threads are only spawned when a job arrives and no idle thread can take
//! it. A finished thread goes to the front of the idle list so the most
//! recently used thread is reused first, and idle threads past their expire
//! time retire themselves.
//!
//! Lock order is `job_lock` -> `lists` -> per-thread job slot. Worker threads
//! never hold their job slot while touching `lists`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::pooled_thread::{Job, PooledThread};
use super::semaphore::Semaphore;
use crate::config::ThreadPoolConfig;

#[derive(Default)]
struct ThreadLists {
    threads: Vec<Arc<PooledThread>>,
    idle: VecDeque<Arc<PooledThread>>,
    expired: Vec<Arc<PooledThread>>,
}

impl ThreadLists {
    fn forget(&mut self, thread: &Arc<PooledThread>) -> bool {
        let before = self.threads.len();
        self.threads.retain(|t| !Arc::ptr_eq(t, thread));
        before != self.threads.len()
    }

    /// Interrupts and retires up to `count` idle threads.
    fn remove_idle_threads(&mut self, count: usize) {
        for _ in 0..count {
            let Some(thread) = self.idle.pop_front() else {
                break;
            };
            thread.interrupt();
            self.forget(&thread);
            self.expired.push(thread);
        }
    }
}

pub(crate) struct PoolShared {
    permits: Semaphore,
    job_lock: Mutex<()>,
    lists: Mutex<ThreadLists>,
    expire_ms: AtomicU64,
    stack_size: AtomicUsize,
    next_id: AtomicUsize,
}

impl PoolShared {
    /// Called by a worker after its job returns.
    pub(crate) fn job_completed(&self, thread: &Arc<PooledThread>) {
        if !thread.is_interrupted() {
            self.lists.lock().idle.push_front(Arc::clone(thread));
        }
        self.permits.release();
    }

    /// Called by a worker whose job panicked. The thread retires, so only
    /// the permit is returned.
    pub(crate) fn job_abandoned(&self) {
        self.permits.release();
    }

    /// Called by a worker on its way out; moves it to the expired list unless
    /// the pool already did.
    pub(crate) fn thread_exited(&self, thread: &Arc<PooledThread>) {
        let mut lists = self.lists.lock();
        lists.idle.retain(|t| !Arc::ptr_eq(t, thread));
        if lists.forget(thread) {
            lists.expired.push(Arc::clone(thread));
        }
    }
}

/// Worker thread pool with a permit-bounded number of running jobs.
///
/// ```
/// use modest_engine::rt::{ThreadPool, WorkerContext};
/// use std::sync::mpsc;
///
/// let pool = ThreadPool::new(2, 256 * 1024);
/// let (tx, rx) = mpsc::channel();
/// pool.run_job(Box::new(move |_ctx: &WorkerContext<'_>| tx.send(42).unwrap()));
/// assert_eq!(rx.recv().unwrap(), 42);
/// pool.terminate_all();
/// ```
pub struct ThreadPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("pool_size", &self.pool_size())
            .field("threads", &self.thread_count())
            .field("idle", &self.idle_thread_count())
            .finish()
    }
}

impl ThreadPool {
    /// Creates a pool allowing `pool_size` concurrent jobs on threads with
    /// the given stack size. Threads never expire by default.
    #[must_use]
    pub fn new(pool_size: u32, stack_size: usize) -> Self {
        info!(pool_size, stack_size, "ThreadPool initialized");
        Self {
            shared: Arc::new(PoolShared {
                permits: Semaphore::new(pool_size),
                job_lock: Mutex::new(()),
                lists: Mutex::new(ThreadLists::default()),
                expire_ms: AtomicU64::new(0),
                stack_size: AtomicUsize::new(stack_size),
                next_id: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates a pool from configuration.
    #[must_use]
    pub fn from_config(config: &ThreadPoolConfig) -> Self {
        let pool = Self::new(config.pool_size, config.thread_stack_size);
        pool.set_thread_expire_time(config.thread_expire_ms);
        pool
    }

    /// Runs `job`, blocking until a permit is free.
    pub fn run_job(&self, job: Job) {
        self.shared.permits.acquire();
        self.run_job_on_idle_thread(job);
    }

    /// Runs `job` only if a permit is free right now; hands the job back
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns the job unchanged when every permit is in use.
    pub fn try_run_job(&self, job: Job) -> Result<(), Job> {
        if self.shared.permits.try_acquire() {
            self.run_job_on_idle_thread(job);
            Ok(())
        } else {
            trace!("No thread permit available");
            Err(job)
        }
    }

    fn run_job_on_idle_thread(&self, job: Job) {
        {
            let _assigning = self.shared.job_lock.lock();
            if let Some(fresh) = self.assign(job) {
                self.start(&fresh);
            }
        }
        self.cleanup_expired_threads();
    }

    /// Hands `job` to an idle thread, or creates a thread for it. Returns
    /// the created thread, which still has to be started.
    fn assign(&self, job: Job) -> Option<Arc<PooledThread>> {
        let mut lists = self.shared.lists.lock();
        let mut job = Some(job);

        while let Some(thread) = lists.idle.pop_front() {
            let mut slot = thread.job_lock();
            if slot.is_expired() || thread.is_interrupted() {
                drop(slot);
                trace!(worker_id = thread.id(), "Discarding retired idle thread");
                lists.forget(&thread);
                lists.expired.push(thread);
                continue;
            }
            if let Some(job) = job.take() {
                slot.assign(job);
            }
            thread.notify_job();
            drop(slot);
            trace!(worker_id = thread.id(), "Job assigned to idle thread");
            break;
        }

        let fresh = job.map(|job| {
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            let thread = Arc::new(PooledThread::new(
                id,
                self.shared.expire_ms.load(Ordering::Relaxed),
                job,
            ));
            lists.threads.push(Arc::clone(&thread));
            thread
        });

        if !lists.idle.is_empty() {
            let max = self.shared.permits.max_permit_count() as usize;
            let extra = lists.threads.len().saturating_sub(max);
            if extra > 0 {
                debug!(extra, "Removing surplus idle threads");
                lists.remove_idle_threads(extra);
            }
        }

        fresh
    }

    fn start(&self, thread: &Arc<PooledThread>) {
        let stack_size = self.shared.stack_size.load(Ordering::Relaxed);
        let pool: Weak<PoolShared> = Arc::downgrade(&self.shared);
        loop {
            match thread.start(stack_size, pool.clone()) {
                Ok(()) => {
                    debug!(worker_id = thread.id(), "Worker thread spawned");
                    return;
                }
                Err(e) => {
                    // usually transient resource exhaustion
                    warn!(worker_id = thread.id(), error = %e, "Failed to spawn worker thread, retrying");
                    thread::yield_now();
                }
            }
        }
    }

    /// Joins and drops threads that have retired.
    pub fn cleanup_expired_threads(&self) {
        let cleanup = std::mem::take(&mut self.shared.lists.lock().expired);
        if cleanup.is_empty() {
            return;
        }
        trace!(count = cleanup.len(), "Joining expired threads");
        for thread in cleanup {
            thread.join();
        }
    }

    /// Interrupts every thread, running or idle.
    pub fn interrupt_all_threads(&self) {
        let _assigning = self.shared.job_lock.lock();
        let lists = self.shared.lists.lock();
        for thread in &lists.threads {
            thread.interrupt();
        }
    }

    /// Interrupts, joins and drops every thread. Blocks until running jobs
    /// return.
    pub fn terminate_all(&self) {
        let _assigning = self.shared.job_lock.lock();
        {
            let mut lists = self.shared.lists.lock();
            for thread in &lists.threads {
                thread.interrupt();
            }
            let threads = std::mem::take(&mut lists.threads);
            lists.expired.extend(threads);
            lists.idle.clear();
        }
        self.cleanup_expired_threads();
        self.shared.lists.lock().idle.clear();
        debug!("All pool threads terminated");
    }

    /// Sets the number of permits. Shrinking retires surplus idle threads at
    /// once; running threads finish their jobs first.
    pub fn set_pool_size(&self, size: u32) {
        {
            let mut lists = self.shared.lists.lock();
            let surplus = lists.threads.len().saturating_sub(size as usize);
            if surplus > 0 {
                lists.remove_idle_threads(surplus);
            }
            self.shared.permits.set_max_permit_count(size);
        }
        info!(pool_size = size, "ThreadPool resized");
        self.cleanup_expired_threads();
    }

    /// Maximum number of concurrently running jobs.
    #[must_use]
    pub fn pool_size(&self) -> u32 {
        self.shared.permits.max_permit_count()
    }

    /// Sets the stack size for threads created from now on.
    pub fn set_thread_stack_size(&self, stack_size: usize) {
        self.shared.stack_size.store(stack_size, Ordering::Relaxed);
    }

    /// Stack size for new threads.
    #[must_use]
    pub fn thread_stack_size(&self) -> usize {
        self.shared.stack_size.load(Ordering::Relaxed)
    }

    /// Sets how long a thread may idle before it retires (0 = never), for
    /// existing and future threads.
    pub fn set_thread_expire_time(&self, expire_ms: u64) {
        self.shared.expire_ms.store(expire_ms, Ordering::Relaxed);
        let lists = self.shared.lists.lock();
        for thread in &lists.threads {
            thread.set_expire_time(expire_ms);
        }
    }

    /// Idle expiration for threads, in milliseconds.
    #[must_use]
    pub fn thread_expire_time(&self) -> u64 {
        self.shared.expire_ms.load(Ordering::Relaxed)
    }

    /// Live threads, idle or running.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared.lists.lock().threads.len()
    }

    /// Threads currently running a job.
    #[must_use]
    pub fn running_thread_count(&self) -> usize {
        let lists = self.shared.lists.lock();
        lists.threads.len().saturating_sub(lists.idle.len())
    }

    /// Threads waiting for a job.
    #[must_use]
    pub fn idle_thread_count(&self) -> usize {
        self.shared.lists.lock().idle.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::WorkerContext;
    use std::sync::mpsc;
    use std::time::Duration;

    const STACK: usize = 256 * 1024;

    fn send_job(tx: mpsc::Sender<usize>) -> Job {
        Box::new(move |ctx: &WorkerContext<'_>| {
            tx.send(ctx.worker_id()).unwrap();
        })
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_threads_are_created_lazily() {
        let pool = ThreadPool::new(4, STACK);
        assert_eq!(pool.thread_count(), 0);

        let (tx, rx) = mpsc::channel();
        pool.run_job(send_job(tx));
        rx.recv().unwrap();
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_idle_thread_is_reused() {
        let pool = ThreadPool::new(4, STACK);
        let (tx, rx) = mpsc::channel();

        pool.run_job(send_job(tx.clone()));
        let first = rx.recv().unwrap();
        assert!(wait_until(|| pool.idle_thread_count() == 1));

        pool.run_job(send_job(tx));
        let second = rx.recv().unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_try_run_job_returns_job_without_permit() {
        let pool = ThreadPool::new(1, STACK);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.run_job(Box::new(move |_ctx: &WorkerContext<'_>| {
            let _ = release_rx.recv();
        }));

        let (tx, rx) = mpsc::channel();
        let job = pool.try_run_job(send_job(tx)).unwrap_err();

        release_tx.send(()).unwrap();
        pool.run_job(job);
        rx.recv().unwrap();
    }

    #[test]
    fn test_terminate_all_joins_everything() {
        let pool = ThreadPool::new(3, STACK);
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            pool.run_job(send_job(tx.clone()));
        }
        for _ in 0..3 {
            rx.recv().unwrap();
        }

        pool.terminate_all();
        assert_eq!(pool.thread_count(), 0);
        assert_eq!(pool.idle_thread_count(), 0);
        assert_eq!(pool.running_thread_count(), 0);
    }

    #[test]
    fn test_shrinking_prunes_idle_threads() {
        let pool = ThreadPool::new(3, STACK);
        let (tx, rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        for _ in 0..3 {
            let tx = tx.clone();
            let release_rx = Arc::clone(&release_rx);
            pool.run_job(Box::new(move |_ctx: &WorkerContext<'_>| {
                tx.send(0).unwrap();
                let _ = release_rx.lock().recv();
            }));
        }
        for _ in 0..3 {
            rx.recv().unwrap();
        }
        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        assert!(wait_until(|| pool.idle_thread_count() == 3));

        pool.set_pool_size(1);
        assert_eq!(pool.pool_size(), 1);
        assert_eq!(pool.thread_count(), 1);
        assert_eq!(pool.idle_thread_count(), 1);
    }

    #[test]
    fn test_expire_time_propagates() {
        let pool = ThreadPool::new(1, STACK);
        pool.set_thread_expire_time(40);
        assert_eq!(pool.thread_expire_time(), 40);
        pool.set_thread_stack_size(512 * 1024);
        assert_eq!(pool.thread_stack_size(), 512 * 1024);
    }
}
