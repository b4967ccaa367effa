//! Builders to construct scheduler components from configuration.

mod engine_builder;

pub use engine_builder::build_engine;
