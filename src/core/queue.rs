//! Ready-queue ordering for pending tasks.
//!
//! The scheduler picks start candidates each tick by sorting ready tasks
//! with [`ReadyEntry`]: priority descending, preempted tasks at the front of
//! their tier, then earlier deadline, then FIFO by creation time.

use std::cmp::Ordering;

use crate::core::task::Priority;
use crate::util::ids::TaskId;

/// Sort key for a pending task that is ready to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEntry {
    /// Task identifier (final tiebreaker for a total order).
    pub task_id: TaskId,
    /// Scheduling priority.
    pub priority: Priority,
    /// Preempted tasks re-queue at the head of their priority tier.
    pub front_of_queue: bool,
    /// Absolute deadline, if any; earlier deadlines start first.
    pub deadline_ms: Option<u128>,
    /// Submission time; FIFO within a tier.
    pub created_at_ms: u128,
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ascending sort yields start order: Less means "starts first".
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.front_of_queue.cmp(&self.front_of_queue))
            .then_with(|| match (self.deadline_ms, other.deadline_ms) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.created_at_ms.cmp(&other.created_at_ms))
            .then_with(|| self.task_id.cmp(&other.task_id))
    }
}
