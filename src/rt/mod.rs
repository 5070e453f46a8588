//! Threading primitives: permits, interruption tokens and the worker pool.

pub mod interrupt;
pub mod pooled_thread;
pub mod semaphore;
pub mod thread_pool;

pub(crate) use interrupt::Wake;
pub use interrupt::Interrupter;
pub use pooled_thread::{Job, PooledThread, WorkerContext};
pub use semaphore::Semaphore;
pub use thread_pool::ThreadPool;
