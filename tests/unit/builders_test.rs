//! Tests for engine builders

use modest_engine::builders::build_engine;
use modest_engine::config::{EngineConfig, ThreadPoolConfig};
use modest_engine::core::{Operation, RunContext, WaitStatus};

#[test]
fn test_build_started_engine() {
    let cfg = EngineConfig::new().with_thread_pool(ThreadPoolConfig::new().with_pool_size(2));
    let engine = build_engine(&cfg, 0u64, true).unwrap();
    assert_eq!(engine.thread_pool().pool_size(), 2);
    assert!(engine.dispatcher().is_dispatching());

    let op = Operation::builder()
        .runnable(|_ctx: &RunContext<'_, u64>| {})
        .build();
    engine.queue(&op).unwrap();
    assert_eq!(op.wait_for(false, 2000), Ok(WaitStatus::Finished));
}

#[test]
fn test_build_unstarted_engine() {
    let engine = build_engine(&EngineConfig::default(), (), false).unwrap();
    assert!(!engine.dispatcher().is_dispatching());
}

#[test]
fn test_build_rejects_invalid_config() {
    let cfg = EngineConfig::new().with_thread_pool(ThreadPoolConfig::new().with_pool_size(0));
    let err = build_engine(&cfg, (), false).unwrap_err();
    assert!(format!("{err:#}").contains("pool_size"));
}
