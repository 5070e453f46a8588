//! Builders to construct engines from configuration.

pub mod engine_builder;

pub use engine_builder::{build_engine, build_engine_from_env};
