//! Workflow orchestrator: expands definitions into per-context task graphs,
//! aggregates per-context results, and advances instances.
//!
//! Dependency ordering is enforced by the scheduler itself: every
//! (step, context) task is submitted up front with its dependency edges, so
//! a context advances through its own chain as soon as its own
//! prerequisites complete, independent of sibling contexts. The
//! orchestrator's tick records terminal outcomes and settles instances.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::checkpoint::WorkflowCheckpoint;
use crate::core::error::SchedulerError;
use crate::core::events::{EventBus, SchedulerEvent, WorkflowOutcome};
use crate::core::executor::TaskExecutor;
use crate::core::scheduler::{Scheduler, TickReport};
use crate::core::task::{TaskSpec, TaskStatus};
use crate::runtime::Spawn;
use crate::util::ids::{InstanceId, TaskId};
use crate::workflow::definition::WorkflowDefinition;
use crate::workflow::instance::{
    Cell, InstanceRecord, StepState, WorkflowSnapshot, WorkflowStatus,
};

/// Payload of one (step, context) task expanded from a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    /// Owning instance.
    pub instance_id: InstanceId,
    /// Definition the instance came from.
    pub definition_id: String,
    /// Step name.
    pub step: String,
    /// Execution context (e.g. a jurisdiction code).
    pub context: String,
    /// Workflow input, passed through to every step.
    pub input: serde_json::Value,
}

/// Orchestrates workflow instances on top of a [`Scheduler`].
pub struct Orchestrator<E, S>
where
    E: TaskExecutor<StepRun>,
    S: Spawn,
{
    scheduler: Arc<Scheduler<StepRun, E, S>>,
    definitions: HashMap<String, WorkflowDefinition>,
    events: EventBus,
    instances: Mutex<HashMap<InstanceId, InstanceRecord>>,
}

impl<E, S> Orchestrator<E, S>
where
    E: TaskExecutor<StepRun>,
    S: Spawn,
{
    /// Create an orchestrator over a scheduler and a set of definitions.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if any definition fails validation or ids collide.
    pub fn new(
        scheduler: Arc<Scheduler<StepRun, E, S>>,
        definitions: impl IntoIterator<Item = WorkflowDefinition>,
        events: EventBus,
    ) -> Result<Self, SchedulerError> {
        let mut map = HashMap::new();
        for definition in definitions {
            definition
                .validate()
                .map_err(SchedulerError::InvalidConfig)?;
            if map
                .insert(definition.id.clone(), definition)
                .is_some()
            {
                return Err(SchedulerError::InvalidConfig(
                    "duplicate workflow definition id".into(),
                ));
            }
        }
        Ok(Self {
            scheduler,
            definitions: map,
            events,
            instances: Mutex::new(HashMap::new()),
        })
    }

    /// The scheduler constituent tasks run on.
    pub fn scheduler(&self) -> &Arc<Scheduler<StepRun, E, S>> {
        &self.scheduler
    }

    /// Start an instance: expand the definition once per execution context
    /// and submit every (step, context) task with its dependency edges.
    ///
    /// # Errors
    ///
    /// `UnknownDefinition` for an unregistered id, `InvalidConfig` for an
    /// empty context list, or any submission error from the scheduler.
    pub fn start(
        &self,
        definition_id: &str,
        contexts: &[String],
        input: serde_json::Value,
        now_ms: u128,
    ) -> Result<InstanceId, SchedulerError> {
        let definition = self
            .definitions
            .get(definition_id)
            .ok_or_else(|| SchedulerError::UnknownDefinition(definition_id.to_string()))?
            .clone();
        if contexts.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "at least one execution context is required".into(),
            ));
        }

        let instance_id = InstanceId::new();
        let mut cells: HashMap<(String, String), Cell> = HashMap::new();
        // (step, context) → task id, for wiring dependency edges.
        let mut task_index: HashMap<(String, String), TaskId> = HashMap::new();

        for step in &definition.steps {
            for context in contexts {
                let mut depends_on = Vec::new();
                for dep_name in &step.depends_on {
                    let barrier = definition.step(dep_name).is_some_and(|d| d.barrier);
                    if barrier {
                        // Barrier dependencies gate on every context.
                        for dep_context in contexts {
                            if let Some(id) =
                                task_index.get(&(dep_name.clone(), dep_context.clone()))
                            {
                                depends_on.push(*id);
                            }
                        }
                    } else if let Some(id) = task_index.get(&(dep_name.clone(), context.clone())) {
                        depends_on.push(*id);
                    }
                }

                let spec = TaskSpec {
                    name: format!("{definition_id}/{}@{context}", step.name),
                    priority: step.priority,
                    requirements: step.resources.clone(),
                    estimated_duration_ms: step.estimated_duration_ms,
                    deadline_ms: step.deadline_ms,
                    depends_on,
                    max_retries: step.max_retries,
                    payload: StepRun {
                        instance_id,
                        definition_id: definition_id.to_string(),
                        step: step.name.clone(),
                        context: context.clone(),
                        input: input.clone(),
                    },
                };
                let task_id = match self.scheduler.submit(spec, now_ms) {
                    Ok(id) => id,
                    Err(err) => {
                        // Unwind the partially expanded instance.
                        for id in task_index.values() {
                            let _ = self.scheduler.cancel(*id, "workflow start failed", now_ms);
                        }
                        return Err(err);
                    }
                };
                task_index.insert((step.name.clone(), context.clone()), task_id);
                cells.insert(
                    (step.name.clone(), context.clone()),
                    Cell {
                        task_id,
                        state: StepState::Pending,
                    },
                );
            }
        }

        tracing::info!(
            instance = %instance_id,
            definition = definition_id,
            contexts = contexts.len(),
            tasks = cells.len(),
            "workflow instance started"
        );
        self.instances.lock().insert(
            instance_id,
            InstanceRecord {
                id: instance_id,
                definition,
                status: WorkflowStatus::Running,
                contexts: contexts.to_vec(),
                started_at_ms: now_ms,
                ended_at_ms: None,
                cells,
            },
        );
        Ok(instance_id)
    }

    /// Snapshot an instance. Always reflects per-context, per-step outcomes;
    /// partial failure is data, not an error.
    ///
    /// # Errors
    ///
    /// `UnknownInstance` if the id does not exist.
    pub fn status(&self, instance_id: InstanceId) -> Result<WorkflowSnapshot, SchedulerError> {
        self.instances
            .lock()
            .get(&instance_id)
            .map(WorkflowSnapshot::from)
            .ok_or(SchedulerError::UnknownInstance(instance_id))
    }

    /// Cancel an instance and all outstanding constituent tasks.
    ///
    /// # Errors
    ///
    /// `UnknownInstance` if the id does not exist.
    pub fn cancel(&self, instance_id: InstanceId, now_ms: u128) -> Result<(), SchedulerError> {
        let mut instances = self.instances.lock();
        let record = instances
            .get_mut(&instance_id)
            .ok_or(SchedulerError::UnknownInstance(instance_id))?;
        if record.status != WorkflowStatus::Running {
            return Ok(());
        }
        for cell in record.cells.values_mut() {
            if !cell.state.is_terminal() {
                let _ = self
                    .scheduler
                    .cancel(cell.task_id, "workflow cancelled", now_ms);
                cell.state = StepState::Cancelled;
            }
        }
        record.status = WorkflowStatus::Cancelled;
        record.ended_at_ms = Some(now_ms);
        self.events.emit(SchedulerEvent::WorkflowFinished {
            instance_id,
            outcome: WorkflowOutcome::Cancelled,
        }, now_ms);
        tracing::info!(instance = %instance_id, "workflow instance cancelled");
        Ok(())
    }

    /// Drive one scheduling round and fold terminal task results into the
    /// owning instances.
    pub fn tick(&self, now_ms: u128) -> TickReport {
        let report = self.scheduler.tick(now_ms);
        self.sync_instances(now_ms);
        report
    }

    /// Serialize instance snapshots for crash recovery.
    pub fn checkpoint(&self) -> WorkflowCheckpoint {
        let instances = self.instances.lock();
        let mut snapshots: Vec<WorkflowSnapshot> =
            instances.values().map(WorkflowSnapshot::from).collect();
        snapshots.sort_by_key(|s| s.started_at_ms);
        WorkflowCheckpoint {
            instances: snapshots,
        }
    }

    fn sync_instances(&self, now_ms: u128) {
        let mut instances = self.instances.lock();
        for record in instances.values_mut() {
            if record.status == WorkflowStatus::Cancelled {
                continue;
            }
            if record.ended_at_ms.is_some() {
                continue;
            }

            let mut blocking_failure = false;
            let cell_keys: Vec<(String, String)> = record
                .cells
                .iter()
                .filter(|(_, c)| !c.state.is_terminal())
                .map(|(k, _)| k.clone())
                .collect();
            for key in cell_keys {
                let Some(cell) = record.cells.get(&key) else {
                    continue;
                };
                let Ok(task) = self.scheduler.status(cell.task_id) else {
                    continue;
                };
                let new_state = match task.status {
                    TaskStatus::Pending => StepState::Pending,
                    TaskStatus::Running => StepState::Running,
                    TaskStatus::Completed => StepState::Succeeded,
                    TaskStatus::Failed => StepState::Failed {
                        reason: task
                            .failure
                            .unwrap_or_else(|| "task failed".into()),
                    },
                    TaskStatus::Cancelled => StepState::Cancelled,
                };
                if matches!(new_state, StepState::Failed { .. } | StepState::Cancelled)
                    && record
                        .definition
                        .step(&key.0)
                        .is_some_and(|step| step.blocking)
                {
                    blocking_failure = true;
                }
                if let Some(cell) = record.cells.get_mut(&key) {
                    cell.state = new_state;
                }
            }

            if blocking_failure && record.status == WorkflowStatus::Running {
                record.status = WorkflowStatus::Failed;
                tracing::warn!(instance = %record.id, "blocking step failed, instance marked failed");
            }

            if record.all_cells_terminal() {
                if record.status == WorkflowStatus::Running {
                    record.status = WorkflowStatus::Completed;
                }
                record.ended_at_ms = Some(now_ms);
                let outcome = match record.status {
                    WorkflowStatus::Failed => WorkflowOutcome::Failed,
                    WorkflowStatus::Cancelled => WorkflowOutcome::Cancelled,
                    _ => WorkflowOutcome::Completed,
                };
                self.events.emit(SchedulerEvent::WorkflowFinished {
                    instance_id: record.id,
                    outcome,
                }, now_ms);
                tracing::info!(instance = %record.id, ?outcome, "workflow instance finished");
            }
        }
    }
}
