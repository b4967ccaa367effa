//! # Task Marshal
//!
//! A resource-aware scheduling core for workloads that fan out across
//! multiple independent execution contexts.
//!
//! The crate manages finite, typed resource pools (compute, memory, I/O,
//! network) under concurrent demand, schedules discrete tasks against those
//! pools with priority, dependency, deadline, and retry semantics, and
//! orchestrates multi-step workflows whose steps run once per execution
//! context (e.g. once per jurisdiction) and aggregate back into a single
//! result.
//!
//! ## Guarantees
//!
//! - **Capacity invariant**: a pool's `allocated` always equals the sum of
//!   its active reservations and never exceeds capacity.
//! - **All-or-nothing grants**: a task holds either every reservation it
//!   declared or none; a shortfall rolls back cleanly and re-queues.
//! - **Starvation-safe reclamation**: higher-priority requests may reclaim
//!   strictly-lower-priority reservations (oldest expiry first), never
//!   same-or-higher priority peers.
//! - **Bounded retries**: a failing task makes exactly `max_retries + 1`
//!   attempts with capped exponential backoff, then fails permanently and
//!   breaks its dependents explicitly.
//! - **Partial-failure workflows**: a context that fails a step does not
//!   block sibling contexts; only a blocking step's failure fails the
//!   instance.
//!
//! ## Shape
//!
//! This is a library-level engine invoked in-process by a host service: no
//! wire protocol, no file parsing, no CLI. The host supplies configuration
//! ([`config::EngineConfig`]), a task executor
//! ([`core::TaskExecutor`]), and a runtime spawner ([`runtime::Spawn`]),
//! then drives [`workflow::Orchestrator::tick`] on a fixed interval (or
//! lets the tokio driver do it).
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use task_marshal::builders::build_engine;
//! use task_marshal::config::EngineConfig;
//! use task_marshal::core::EventBus;
//! use task_marshal::runtime::TokioSpawner;
//! use task_marshal::util::now_ms;
//!
//! let cfg = EngineConfig::from_json_str(&config_json).map_err(anyhow::Error::msg)?;
//! let events = EventBus::new();
//! let (ledger, orchestrator) =
//!     build_engine(&cfg, my_step_executor, TokioSpawner::current(), events)?;
//!
//! let instance = orchestrator.start(
//!     "filings",
//!     &["EU".into(), "US".into()],
//!     serde_json::json!({ "quarter": "2026-Q3" }),
//!     now_ms(),
//! )?;
//! orchestrator.tick(now_ms());
//! let snapshot = orchestrator.status(instance)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Configuration models for pools, scheduler settings, and workflows.
pub mod config;
/// Core scheduling abstractions: pools, ledger, tasks, and the scheduler.
pub mod core;
/// Runtime adapters and the `Spawn` abstraction.
pub mod runtime;
/// Shared utilities.
pub mod util;
/// Workflow definitions, instances, and the orchestrator.
pub mod workflow;
