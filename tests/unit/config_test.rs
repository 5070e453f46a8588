//! Tests for configuration validation and loading

use modest_engine::config::engine::{
    DEFAULT_THREAD_STACK_SIZE, ENV_POOL_SIZE, ENV_THREAD_EXPIRE_MS, ENV_THREAD_STACK_SIZE,
    MIN_THREAD_STACK_SIZE,
};
use modest_engine::config::{EngineConfig, ThreadPoolConfig};

#[test]
fn test_pool_config_validation() {
    let valid = ThreadPoolConfig {
        pool_size: 4,
        thread_expire_ms: 1_000,
        thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
    };
    assert!(valid.validate().is_ok());
}

#[test]
fn test_pool_config_invalid_pool_size() {
    let invalid = ThreadPoolConfig::new().with_pool_size(0);
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("pool_size"));
}

#[test]
fn test_pool_config_invalid_stack_size() {
    let invalid = ThreadPoolConfig::new().with_thread_stack_size(MIN_THREAD_STACK_SIZE - 1);
    assert!(invalid.validate().is_err());
    let minimal = ThreadPoolConfig::new().with_thread_stack_size(MIN_THREAD_STACK_SIZE);
    assert!(minimal.validate().is_ok());
}

#[test]
fn test_engine_config_names_section() {
    let cfg = EngineConfig::new().with_thread_pool(ThreadPoolConfig::new().with_pool_size(0));
    let err = cfg.validate().unwrap_err();
    assert!(err.starts_with("thread_pool invalid"));
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "thread_pool": {
            "pool_size": 8,
            "thread_expire_ms": 250,
            "thread_stack_size": 1048576
        }
    }"#;
    let cfg = EngineConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.thread_pool.pool_size, 8);
    assert_eq!(cfg.thread_pool.thread_expire_ms, 250);
    assert_eq!(cfg.thread_pool.thread_stack_size, 1_048_576);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(EngineConfig::from_json_str(r#"{"thread_pool": {"pool_size": 0}}"#).is_err());
    let err = EngineConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_config_round_trips_through_json() {
    let cfg = EngineConfig::new().with_thread_pool(
        ThreadPoolConfig::new()
            .with_pool_size(2)
            .with_thread_expire_ms(10),
    );
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(EngineConfig::from_json_str(&json).unwrap(), cfg);
}

// Environment variables are process-global, so every env scenario lives in
// one test.
#[test]
fn test_config_from_env() {
    std::env::set_var(ENV_POOL_SIZE, "3");
    std::env::set_var(ENV_THREAD_EXPIRE_MS, "500");
    std::env::set_var(ENV_THREAD_STACK_SIZE, "131072");
    let cfg = EngineConfig::from_env().unwrap();
    assert_eq!(cfg.thread_pool.pool_size, 3);
    assert_eq!(cfg.thread_pool.thread_expire_ms, 500);
    assert_eq!(cfg.thread_pool.thread_stack_size, 131_072);

    std::env::set_var(ENV_POOL_SIZE, "lots");
    assert!(EngineConfig::from_env().is_err());

    std::env::set_var(ENV_POOL_SIZE, "0");
    assert!(EngineConfig::from_env().is_err());

    std::env::remove_var(ENV_POOL_SIZE);
    std::env::remove_var(ENV_THREAD_EXPIRE_MS);
    std::env::remove_var(ENV_THREAD_STACK_SIZE);
    let cfg = EngineConfig::from_env().unwrap();
    assert_eq!(cfg.thread_pool.thread_stack_size, DEFAULT_THREAD_STACK_SIZE);
}
