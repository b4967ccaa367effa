//! Checkpoint record shapes for crash recovery.
//!
//! The core defines only the serialized shape; where and how the records are
//! stored is the host's concern.

use serde::{Deserialize, Serialize};

use crate::core::task::TaskRecord;
use crate::workflow::instance::WorkflowSnapshot;

/// Serialized scheduler state: the full task arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "P: Serialize"))]
#[serde(bound(deserialize = "P: serde::de::DeserializeOwned"))]
pub struct SchedulerCheckpoint<P> {
    /// Every tracked task, ordered by creation time.
    pub tasks: Vec<TaskRecord<P>>,
}

/// Serialized orchestrator state: one snapshot per live instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// Snapshots of all tracked workflow instances.
    pub instances: Vec<WorkflowSnapshot>,
}
