//! Configuration models for pools, scheduler settings, and workflows.

pub mod engine;

pub use engine::{EngineConfig, PoolDef, SchedulerSettings};
