//! Static configuration for pools, scheduler settings, and workflow
//! definitions. The core does not read files; hosts hand it parsed structures
//! (or use `from_json_str` on a string they loaded themselves).

use serde::{Deserialize, Serialize};

use crate::core::pool::ResourceKind;
use crate::workflow::definition::WorkflowDefinition;

/// Static definition of one resource pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDef {
    /// Pool identifier, unique across the engine.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Total capacity in integer units.
    pub capacity: u64,
}

/// Tunables for the scheduling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Concurrency ceiling: maximum tasks in `Running` at once.
    pub max_concurrency: usize,
    /// Interval of the driving tick in milliseconds.
    pub tick_interval_ms: u64,
    /// Base of the exponential retry backoff in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on the retry backoff in milliseconds.
    pub backoff_cap_ms: u64,
    /// Delay before a task squeezed out by capacity is reconsidered.
    pub requeue_delay_ms: u64,
    /// Multiplier on `estimated_duration_ms` after which a running task is
    /// flagged for inspection.
    pub safety_factor: f64,
    /// Floor for reservation TTLs when a task has no deadline.
    pub default_reservation_ttl_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get(),
            tick_interval_ms: 2_000,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            requeue_delay_ms: 250,
            safety_factor: 2.0,
            default_reservation_ttl_ms: 60_000,
        }
    }
}

impl SchedulerSettings {
    /// Validate settings values.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".into());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        if self.backoff_base_ms == 0 {
            return Err("backoff_base_ms must be greater than 0".into());
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err("backoff_cap_ms must be at least backoff_base_ms".into());
        }
        if self.safety_factor < 1.0 {
            return Err("safety_factor must be at least 1.0".into());
        }
        Ok(())
    }
}

/// Root engine configuration: pools, settings, and workflow definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resource pools created at startup.
    pub pools: Vec<PoolDef>,
    /// Scheduling loop tunables.
    #[serde(default)]
    pub settings: SchedulerSettings,
    /// Registered workflow definitions.
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

impl EngineConfig {
    /// Validate pools, settings, and every workflow definition.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (i, pool) in self.pools.iter().enumerate() {
            if pool.capacity == 0 {
                return Err(format!("pool `{}` must have capacity > 0", pool.id));
            }
            if self.pools[..i].iter().any(|p| p.id == pool.id) {
                return Err(format!("duplicate pool id `{}`", pool.id));
            }
        }
        self.settings.validate()?;
        for (i, workflow) in self.workflows.iter().enumerate() {
            workflow
                .validate()
                .map_err(|e| format!("workflow `{}` invalid: {e}", workflow.id))?;
            if self.workflows[..i].iter().any(|w| w.id == workflow.id) {
                return Err(format!("duplicate workflow id `{}`", workflow.id));
            }
            for step in &workflow.steps {
                for req in &step.resources {
                    if !self.pools.iter().any(|p| p.id == req.pool_id) {
                        return Err(format!(
                            "workflow `{}` step `{}` references unknown pool `{}`",
                            workflow.id, step.name, req.pool_id
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Parse an engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns parse errors or the first validation problem.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: EngineConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
