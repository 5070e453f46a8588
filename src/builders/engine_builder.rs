//! Engine construction from validated configuration.

use anyhow::Context;
use tracing::debug;

use crate::config::EngineConfig;
use crate::core::{AppResult, Engine};

/// Build an engine over `state` from `cfg`, starting it when `start` is set.
///
/// # Errors
///
/// Fails when the configuration is invalid or the dispatcher cannot start.
pub fn build_engine<S>(cfg: &EngineConfig, state: S, start: bool) -> AppResult<Engine<S>>
where
    S: Send + Sync + 'static,
{
    let engine = Engine::with_config(cfg, state).context("config invalid")?;
    debug!(
        pool_size = cfg.thread_pool.pool_size,
        thread_expire_ms = cfg.thread_pool.thread_expire_ms,
        thread_stack_size = cfg.thread_pool.thread_stack_size,
        "Engine built"
    );
    if start {
        engine.start().context("engine failed to start")?;
    }
    Ok(engine)
}

/// Build and start an engine configured from the environment.
///
/// # Errors
///
/// Fails when an environment override is malformed or invalid.
pub fn build_engine_from_env<S>(state: S) -> AppResult<Engine<S>>
where
    S: Send + Sync + 'static,
{
    let cfg = EngineConfig::from_env().context("loading engine config from environment")?;
    build_engine(&cfg, state, true)
}
