//! Task execution traits and payload abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::task::Priority;
use crate::util::ids::TaskId;

/// Marker trait for task payloads.
///
/// Payloads must be `Send + Sync` for cross-thread execution, `Clone` so a
/// retried attempt gets its own copy, and serializable for checkpointing.
pub trait TaskPayload:
    Send + Sync + Clone + Serialize + for<'de> Deserialize<'de> + 'static
{
}

/// Blanket implementation: any type meeting the requirements is a `TaskPayload`.
impl<T> TaskPayload for T where
    T: Send + Sync + Clone + Serialize + for<'de> Deserialize<'de> + 'static
{
}

/// Outcome of one execution attempt. `Err` triggers the retry path.
pub type TaskResult = Result<serde_json::Value, String>;

/// Per-attempt context handed to the executor alongside the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    /// Task identifier.
    pub task_id: TaskId,
    /// Task name.
    pub name: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Attempt number, 1-based.
    pub attempt: u32,
}

/// Abstraction for executing a task payload and producing a result.
///
/// The executor owns the business logic of a task; the scheduler only
/// decides when an attempt may run. Execution bodies may block on external
/// I/O — the scheduler is notified asynchronously when they finish.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use task_marshal::core::{TaskContext, TaskExecutor, TaskResult};
///
/// #[derive(Clone)]
/// struct ReportExecutor;
///
/// #[derive(Clone, serde::Serialize, serde::Deserialize)]
/// struct ReportJob {
///     region: String,
/// }
///
/// #[async_trait]
/// impl TaskExecutor<ReportJob> for ReportExecutor {
///     async fn execute(&self, payload: ReportJob, ctx: TaskContext) -> TaskResult {
///         Ok(serde_json::json!({ "region": payload.region, "attempt": ctx.attempt }))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor<P>: Send + Sync + Clone + 'static
where
    P: TaskPayload,
{
    /// Execute one attempt of a task.
    async fn execute(&self, payload: P, ctx: TaskContext) -> TaskResult;
}
