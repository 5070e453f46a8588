//! Thread pool and engine configuration structures.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Smallest stack a pooled thread may be configured with.
pub const MIN_THREAD_STACK_SIZE: usize = 64 * 1024;

/// Stack size used when none is configured.
pub const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Environment variable overriding [`ThreadPoolConfig::pool_size`].
pub const ENV_POOL_SIZE: &str = "MODEST_POOL_SIZE";
/// Environment variable overriding [`ThreadPoolConfig::thread_expire_ms`].
pub const ENV_THREAD_EXPIRE_MS: &str = "MODEST_THREAD_EXPIRE_MS";
/// Environment variable overriding [`ThreadPoolConfig::thread_stack_size`].
pub const ENV_THREAD_STACK_SIZE: &str = "MODEST_THREAD_STACK_SIZE";

fn default_pool_size() -> u32 {
    u32::try_from(num_cpus::get()).unwrap_or(u32::MAX).max(1)
}

const fn default_stack_size() -> usize {
    DEFAULT_THREAD_STACK_SIZE
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPoolConfig {
    /// Maximum number of concurrently running jobs.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Idle time in milliseconds after which a pooled thread exits.
    /// Zero keeps idle threads forever.
    #[serde(default)]
    pub thread_expire_ms: u64,
    /// Stack size in bytes for newly spawned pooled threads.
    #[serde(default = "default_stack_size")]
    pub thread_stack_size: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            thread_expire_ms: 0,
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
        }
    }
}

impl ThreadPoolConfig {
    /// Defaults: one thread per CPU, no expiry, 2 MiB stacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pool size.
    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the idle expiry in milliseconds.
    #[must_use]
    pub const fn with_thread_expire_ms(mut self, expire_ms: u64) -> Self {
        self.thread_expire_ms = expire_ms;
        self
    }

    /// Sets the stack size for pooled threads.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, stack_size: usize) -> Self {
        self.thread_stack_size = stack_size;
        self
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 {
            return Err("pool_size must be greater than 0".into());
        }
        if self.thread_stack_size < MIN_THREAD_STACK_SIZE {
            return Err(format!(
                "thread_stack_size must be at least {MIN_THREAD_STACK_SIZE} bytes"
            ));
        }
        Ok(())
    }

    /// Overrides fields from `MODEST_*` environment variables.
    fn apply_env(&mut self) -> AppResult<()> {
        if let Some(size) = env_var(ENV_POOL_SIZE)? {
            self.pool_size = size;
        }
        if let Some(expire) = env_var(ENV_THREAD_EXPIRE_MS)? {
            self.thread_expire_ms = expire;
        }
        if let Some(stack) = env_var(ENV_THREAD_STACK_SIZE)? {
            self.thread_stack_size = stack;
        }
        Ok(())
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool settings.
    #[serde(default)]
    pub thread_pool: ThreadPoolConfig,
}

impl EngineConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the worker pool settings.
    #[must_use]
    pub const fn with_thread_pool(mut self, thread_pool: ThreadPoolConfig) -> Self {
        self.thread_pool = thread_pool;
        self
    }

    /// Validate all nested sections.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        self.thread_pool
            .validate()
            .map_err(|e| format!("thread_pool invalid: {e}"))
    }

    /// Parse engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `MODEST_*` variables, after loading `.env`
    /// if one exists.
    ///
    /// # Errors
    ///
    /// Fails when a variable does not parse or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        // a missing .env file is not an error
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.thread_pool.apply_env()?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn env_var<T>(key: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key}={raw}: {e}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(anyhow::anyhow!("{key}: {e}")),
    }
}
