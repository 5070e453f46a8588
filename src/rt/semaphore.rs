//! Counting semaphore bounding the number of concurrently running jobs.
//!
//! Built on `parking_lot::{Mutex, Condvar}`. The maximum permit count can be
//! changed while permits are outstanding; shrinking the maximum may drive
//! the available count negative, in which case acquirers block until enough
//! permits have been released to bring it back above zero.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct Permits {
    max: u32,
    available: i64,
}

/// A counting semaphore with an adjustable maximum.
///
/// ```
/// use modest_engine::rt::Semaphore;
///
/// let sem = Semaphore::new(2);
/// assert!(sem.try_acquire());
/// assert!(sem.try_acquire());
/// assert!(!sem.try_acquire());
/// sem.release();
/// assert_eq!(sem.available_permits(), 1);
/// ```
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<Permits>,
    cond: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with `max` permits, all available.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self {
            permits: Mutex::new(Permits {
                max,
                available: max as i64,
            }),
            cond: Condvar::new(),
        }
    }

    /// Blocks until a permit is available and takes it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while permits.available <= 0 {
            self.cond.wait(&mut permits);
        }
        permits.available -= 1;
    }

    /// Takes a permit if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if permits.available > 0 {
            permits.available -= 1;
            true
        } else {
            false
        }
    }

    /// Returns a permit and wakes one blocked acquirer.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        permits.available += 1;
        if permits.available > 0 {
            self.cond.notify_one();
        }
    }

    /// Changes the maximum permit count, adjusting the available count by
    /// the same delta.
    pub fn set_max_permit_count(&self, max: u32) {
        let mut permits = self.permits.lock();
        let delta = i64::from(max) - i64::from(permits.max);
        permits.max = max;
        permits.available += delta;
        if delta > 0 {
            self.cond.notify_all();
        }
    }

    /// Current maximum permit count.
    pub fn max_permit_count(&self) -> u32 {
        self.permits.lock().max
    }

    /// Permits that could be acquired right now (negative while a shrink is
    /// still draining).
    pub fn available_permits(&self) -> i64 {
        self.permits.lock().available
    }
}
