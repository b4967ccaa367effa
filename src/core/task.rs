//! Task model: specs, records, and the status state machine.

use serde::{Deserialize, Serialize};

use crate::util::ids::{ReservationId, TaskId};

/// Scheduling priority. Ordering follows declaration: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work, displaced first.
    Low,
    /// Default tier.
    Medium,
    /// Latency-sensitive work.
    High,
    /// Must-run work; may preempt lower tiers.
    Critical,
}

/// Status of a task in the scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting for dependencies, backoff, or capacity.
    Pending,
    /// Resources granted and execution body in flight.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed permanently (retries exhausted or dependency broken). Terminal.
    Failed,
    /// Cancelled by the caller, a deadline, or shutdown. Terminal.
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One resource requirement of a task: an amount drawn from a named pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    /// Pool to draw from.
    pub pool_id: String,
    /// Units required.
    pub amount: u64,
}

impl ResourceRequirement {
    /// Convenience constructor.
    pub fn new(pool_id: impl Into<String>, amount: u64) -> Self {
        Self {
            pool_id: pool_id.into(),
            amount,
        }
    }
}

/// Caller-supplied description of a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "P: Serialize"))]
#[serde(bound(deserialize = "P: serde::de::DeserializeOwned"))]
pub struct TaskSpec<P> {
    /// Human-readable name, used in events and logs.
    pub name: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Resource requirements, granted all-or-nothing.
    pub requirements: Vec<ResourceRequirement>,
    /// Estimated execution duration in milliseconds.
    pub estimated_duration_ms: u64,
    /// Optional absolute deadline (ms since epoch); the task is cancelled
    /// outright once this passes.
    pub deadline_ms: Option<u128>,
    /// Tasks that must reach `Completed` before this one may start.
    pub depends_on: Vec<TaskId>,
    /// Retry budget for execution failures.
    pub max_retries: u32,
    /// Opaque payload handed to the executor on each attempt.
    pub payload: P,
}

/// Arena entry tracking a task through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "P: Serialize"))]
#[serde(bound(deserialize = "P: serde::de::DeserializeOwned"))]
pub struct TaskRecord<P> {
    /// Task identifier.
    pub id: TaskId,
    /// The submitted spec.
    pub spec: TaskSpec<P>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Execution failures so far (preemption does not count).
    pub retry_count: u32,
    /// Bumped on every start and preemption; outcomes carrying a stale
    /// epoch are discarded.
    pub attempt_epoch: u64,
    /// Submission time.
    pub created_at_ms: u128,
    /// Last start time, if any.
    pub started_at_ms: Option<u128>,
    /// Terminal transition time, if any.
    pub completed_at_ms: Option<u128>,
    /// Reservations currently held. Empty unless `Running`.
    pub held: Vec<ReservationId>,
    /// Backoff gate: not eligible to start before this time.
    pub not_before_ms: u128,
    /// Preempted tasks go back to the head of their priority tier.
    pub front_of_queue: bool,
    /// Set once an overrun event has been emitted for the current attempt.
    pub overrun_flagged: bool,
    /// Terminal failure or cancellation reason.
    pub failure: Option<String>,
    /// Execution result of a completed task.
    pub result: Option<serde_json::Value>,
}

impl<P> TaskRecord<P> {
    /// Create a pending record for a freshly submitted spec.
    pub fn new(id: TaskId, spec: TaskSpec<P>, now_ms: u128) -> Self {
        Self {
            id,
            spec,
            status: TaskStatus::Pending,
            retry_count: 0,
            attempt_epoch: 0,
            created_at_ms: now_ms,
            started_at_ms: None,
            completed_at_ms: None,
            held: Vec::new(),
            not_before_ms: 0,
            front_of_queue: false,
            overrun_flagged: false,
            failure: None,
            result: None,
        }
    }

    /// Milliseconds of estimated work remaining for a running task.
    pub fn remaining_ms(&self, now_ms: u128) -> u128 {
        let started = self.started_at_ms.unwrap_or(now_ms);
        (started + u128::from(self.spec.estimated_duration_ms)).saturating_sub(now_ms)
    }
}

/// Payload-free view of a task for status APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub id: TaskId,
    /// Task name.
    pub name: String,
    /// Current status.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Execution failures so far.
    pub retry_count: u32,
    /// Submission time.
    pub created_at_ms: u128,
    /// Last start time.
    pub started_at_ms: Option<u128>,
    /// Terminal transition time.
    pub completed_at_ms: Option<u128>,
    /// Terminal failure or cancellation reason.
    pub failure: Option<String>,
    /// Execution result of a completed task.
    pub result: Option<serde_json::Value>,
}

impl<P> From<&TaskRecord<P>> for TaskSnapshot {
    fn from(record: &TaskRecord<P>) -> Self {
        Self {
            id: record.id,
            name: record.spec.name.clone(),
            status: record.status,
            priority: record.spec.priority,
            retry_count: record.retry_count,
            created_at_ms: record.created_at_ms,
            started_at_ms: record.started_at_ms,
            completed_at_ms: record.completed_at_ms,
            failure: record.failure.clone(),
            result: record.result.clone(),
        }
    }
}
