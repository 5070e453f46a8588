//! Configuration models for the worker pool and engine.

pub mod engine;

pub use engine::{EngineConfig, ThreadPoolConfig};
