//! Shared harness for integration tests: a deterministic spawner that runs
//! execution bodies only when told to, and scripted executors.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use task_marshal::config::SchedulerSettings;
use task_marshal::core::{
    EventBus, ReservationLedger, ResourceKind, Scheduler, TaskContext, TaskExecutor, TaskResult,
};
use task_marshal::runtime::Spawn;
use task_marshal::workflow::StepRun;

/// Fail marker meaning "fail every attempt".
pub const ALWAYS: u32 = u32::MAX;

/// Spawner that parks execution bodies until the test drives them. Keeps
/// tasks observably `Running` across ticks without sleeping.
#[derive(Clone, Default)]
pub struct DeferredSpawner {
    parked: Arc<Mutex<Vec<BoxFuture<'static, ()>>>>,
}

impl DeferredSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every parked body to completion. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let parked: Vec<_> = self.parked.lock().drain(..).collect();
        let count = parked.len();
        for fut in parked {
            futures::executor::block_on(fut);
        }
        count
    }

    pub fn parked_count(&self) -> usize {
        self.parked.lock().len()
    }
}

impl Spawn for DeferredSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.parked.lock().push(Box::pin(fut));
    }
}

/// Payload for plain scheduler tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestJob {
    pub label: String,
}

/// Executor whose failures are scripted per job label. Records every call.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    fail_remaining: Arc<Mutex<HashMap<String, u32>>>,
    calls: Arc<Mutex<Vec<(String, u32)>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `times` attempts of `label` (`ALWAYS` for every attempt).
    pub fn fail(&self, label: &str, times: u32) {
        self.fail_remaining.lock().insert(label.to_string(), times);
    }

    /// `(label, attempt)` pairs in execution order.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, label: &str) -> usize {
        self.calls.lock().iter().filter(|(l, _)| l == label).count()
    }
}

#[async_trait]
impl TaskExecutor<TestJob> for ScriptedExecutor {
    async fn execute(&self, payload: TestJob, ctx: TaskContext) -> TaskResult {
        self.calls.lock().push((payload.label.clone(), ctx.attempt));
        let mut fails = self.fail_remaining.lock();
        if let Some(remaining) = fails.get_mut(&payload.label) {
            if *remaining > 0 {
                if *remaining != ALWAYS {
                    *remaining -= 1;
                }
                return Err(format!("scripted failure for `{}`", payload.label));
            }
        }
        Ok(serde_json::json!({ "label": payload.label }))
    }
}

/// Executor for workflow tests, scripted per (step, context) cell.
#[derive(Clone, Default)]
pub struct StepExecutor {
    fail_remaining: Arc<Mutex<HashMap<(String, String), u32>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl StepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, step: &str, context: &str, times: u32) {
        self.fail_remaining
            .lock()
            .insert((step.to_string(), context.to_string()), times);
    }

    /// `(step, context)` pairs in execution order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn executed(&self, step: &str, context: &str) -> bool {
        self.calls
            .lock()
            .iter()
            .any(|(s, c)| s == step && c == context)
    }
}

#[async_trait]
impl TaskExecutor<StepRun> for StepExecutor {
    async fn execute(&self, payload: StepRun, _ctx: TaskContext) -> TaskResult {
        let key = (payload.step.clone(), payload.context.clone());
        self.calls.lock().push(key.clone());
        let mut fails = self.fail_remaining.lock();
        if let Some(remaining) = fails.get_mut(&key) {
            if *remaining > 0 {
                if *remaining != ALWAYS {
                    *remaining -= 1;
                }
                return Err(format!("scripted failure for {}@{}", key.0, key.1));
            }
        }
        Ok(serde_json::json!({ "step": payload.step, "context": payload.context }))
    }
}

/// Settings tuned for fast, deterministic tests.
pub fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        max_concurrency: 4,
        tick_interval_ms: 100,
        backoff_base_ms: 100,
        backoff_cap_ms: 1_000,
        requeue_delay_ms: 50,
        safety_factor: 2.0,
        default_reservation_ttl_ms: 60_000,
    }
}

/// Ledger over the given pools, sharing the provided bus.
pub fn ledger_with(
    pools: &[(&str, ResourceKind, u64)],
    events: EventBus,
) -> Arc<ReservationLedger> {
    Arc::new(
        ReservationLedger::new(
            pools
                .iter()
                .map(|(id, kind, capacity)| ((*id).to_string(), *kind, *capacity)),
            events,
        )
        .unwrap(),
    )
}

/// Scheduler over a fresh ledger with a deferred spawner.
pub fn scheduler_with(
    pools: &[(&str, ResourceKind, u64)],
    settings: SchedulerSettings,
) -> (
    Arc<Scheduler<TestJob, ScriptedExecutor, DeferredSpawner>>,
    ScriptedExecutor,
    DeferredSpawner,
) {
    let events = EventBus::new();
    let ledger = ledger_with(pools, events.clone());
    let executor = ScriptedExecutor::new();
    let spawner = DeferredSpawner::new();
    let scheduler = Arc::new(
        Scheduler::new(ledger, settings, executor.clone(), spawner.clone(), events).unwrap(),
    );
    (scheduler, executor, spawner)
}

/// Assert the capacity invariant: per pool, `allocated` equals the sum of
/// active reservation amounts and never exceeds capacity.
pub fn assert_capacity_invariant(ledger: &ReservationLedger) {
    let reservations = ledger.reservations();
    for pool in ledger.pools() {
        let sum: u64 = reservations
            .iter()
            .filter(|r| r.pool_id == pool.id)
            .map(|r| r.amount)
            .sum();
        assert_eq!(
            pool.allocated, sum,
            "pool `{}` allocated {} != reservation sum {}",
            pool.id, pool.allocated, sum
        );
        assert!(
            pool.allocated <= pool.capacity,
            "pool `{}` over capacity",
            pool.id
        );
    }
}
