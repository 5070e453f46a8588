//! Tests for error types

use modest_engine::core::{Interrupted, KernelError};

#[test]
fn test_already_queued_error() {
    let id = uuid::Uuid::nil();
    let err = KernelError::AlreadyQueued(id);
    assert_eq!(
        format!("{}", err),
        "operation 00000000-0000-0000-0000-000000000000 already queued"
    );
}

#[test]
fn test_engine_stopped_error() {
    let err = KernelError::EngineStopped;
    assert_eq!(format!("{}", err), "engine stopped");
}

#[test]
fn test_invalid_config_error() {
    let err = KernelError::InvalidConfig("pool_size must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: pool_size must be greater than 0"
    );
}

#[test]
fn test_thread_spawn_error() {
    let err = KernelError::ThreadSpawn("resource temporarily unavailable".to_string());
    assert_eq!(
        format!("{}", err),
        "failed to spawn thread: resource temporarily unavailable"
    );
}

#[test]
fn test_interrupted_error() {
    assert_eq!(format!("{}", Interrupted), "thread interrupted while waiting");
}

#[test]
fn test_errors_convert_to_anyhow() {
    let err: anyhow::Error = KernelError::EngineStopped.into();
    assert!(err.downcast_ref::<KernelError>().is_some());
}
