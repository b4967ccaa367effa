//! Workflow instances: per-(step, context) bookkeeping and snapshots.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::util::ids::{InstanceId, TaskId};
use crate::workflow::definition::WorkflowDefinition;

/// Status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Constituent tasks are still outstanding.
    Running,
    /// Every (step, context) finished and no blocking step failed.
    Completed,
    /// A blocking step failed permanently in at least one context.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

/// Outcome of one (step, context) cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    /// Waiting on dependencies, backoff, or capacity.
    Pending,
    /// The constituent task is running.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Failed permanently.
    Failed {
        /// Terminal failure reason.
        reason: String,
    },
    /// Cancelled (caller cancellation or deadline).
    Cancelled,
}

impl StepState {
    /// Whether the cell has a terminal result.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. } | Self::Cancelled)
    }
}

/// One (step, context) cell of an instance.
#[derive(Debug, Clone)]
pub(crate) struct Cell {
    pub task_id: TaskId,
    pub state: StepState,
}

/// Internal record of a live instance.
#[derive(Debug, Clone)]
pub(crate) struct InstanceRecord {
    pub id: InstanceId,
    pub definition: WorkflowDefinition,
    pub status: WorkflowStatus,
    pub contexts: Vec<String>,
    pub started_at_ms: u128,
    pub ended_at_ms: Option<u128>,
    /// Keyed by (step name, context).
    pub cells: HashMap<(String, String), Cell>,
}

impl InstanceRecord {
    pub fn all_cells_terminal(&self) -> bool {
        self.cells.values().all(|c| c.state.is_terminal())
    }
}

/// Caller-facing snapshot of an instance: per-step, per-context outcomes.
/// Returned by `status` regardless of partial failure instead of erroring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Definition the instance was expanded from.
    pub definition_id: String,
    /// Instance status.
    pub status: WorkflowStatus,
    /// Target execution contexts.
    pub contexts: Vec<String>,
    /// Start time.
    pub started_at_ms: u128,
    /// Terminal transition time, once finished.
    pub ended_at_ms: Option<u128>,
    /// Step name → context → cell state.
    pub steps: BTreeMap<String, BTreeMap<String, StepState>>,
}

impl From<&InstanceRecord> for WorkflowSnapshot {
    fn from(record: &InstanceRecord) -> Self {
        let mut steps: BTreeMap<String, BTreeMap<String, StepState>> = BTreeMap::new();
        for ((step, context), cell) in &record.cells {
            steps
                .entry(step.clone())
                .or_default()
                .insert(context.clone(), cell.state.clone());
        }
        Self {
            instance_id: record.id,
            definition_id: record.definition.id.clone(),
            status: record.status,
            contexts: record.contexts.clone(),
            started_at_ms: record.started_at_ms,
            ended_at_ms: record.ended_at_ms,
            steps,
        }
    }
}
