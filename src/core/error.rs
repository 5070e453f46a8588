//! Error types for kernel operations.

use thiserror::Error;

/// Errors produced when submitting work or configuring the kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The operation was already handed to an engine.
    #[error("operation {0} already queued")]
    AlreadyQueued(uuid::Uuid),
    /// The engine has been stopped and accepts no new operations.
    #[error("engine stopped")]
    EngineStopped,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A kernel background thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),
}

/// The calling thread was interrupted while waiting.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("thread interrupted while waiting")]
pub struct Interrupted;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
