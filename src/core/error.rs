//! Error types for scheduler operations.

use thiserror::Error;

use crate::util::ids::{InstanceId, TaskId};

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A reservation could not be granted even after reclamation.
    #[error("insufficient capacity on pool `{pool_id}`: requested {requested}, available {available}")]
    InsufficientCapacity {
        /// Pool that could not satisfy the request.
        pool_id: String,
        /// Units requested.
        requested: u64,
        /// Units available after reclamation.
        available: u64,
    },
    /// A depended-on task failed permanently.
    #[error("task {task_id} depends on permanently failed task {failed_dependency}")]
    DependencyUnsatisfiable {
        /// Task whose dependency chain broke.
        task_id: TaskId,
        /// The dependency that failed.
        failed_dependency: TaskId,
    },
    /// A task failed permanently after exhausting its retry budget.
    #[error("task {task_id} failed permanently after {attempts} attempts")]
    RetriesExhausted {
        /// Task that exhausted retries.
        task_id: TaskId,
        /// Total attempts made.
        attempts: u32,
    },
    /// A task or reservation exceeded its time budget.
    #[error("task {task_id} exceeded its deadline")]
    DeadlineExceeded {
        /// Task that blew its deadline.
        task_id: TaskId,
    },
    /// A submission referenced a pool the ledger does not manage.
    #[error("unknown pool `{0}`")]
    UnknownPool(String),
    /// An operation referenced a task the scheduler does not track.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    /// A workflow start referenced an unregistered definition.
    #[error("unknown workflow definition `{0}`")]
    UnknownDefinition(String),
    /// An operation referenced a workflow instance that does not exist.
    #[error("unknown workflow instance {0}")]
    UnknownInstance(InstanceId),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
