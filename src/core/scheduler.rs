//! Task scheduler: pending queue, concurrency ceiling, dependency gating,
//! all-or-nothing grants, preemption, and retry with backoff.
//!
//! The scheduler is tick-driven: `tick(now_ms)` performs one round of
//! outcome draining, expiry sweeping, deadline enforcement, and slot
//! filling. `submit` and `cancel` never block on execution; they only take
//! the state mutex briefly. Execution bodies run concurrently through the
//! [`Spawn`] abstraction and report back over a channel the tick drains.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::SchedulerSettings;
use crate::core::checkpoint::SchedulerCheckpoint;
use crate::core::error::SchedulerError;
use crate::core::events::{EventBus, SchedulerEvent};
use crate::core::executor::{TaskContext, TaskExecutor, TaskPayload, TaskResult};
use crate::core::ledger::ReservationLedger;
use crate::core::queue::ReadyEntry;
use crate::core::task::{TaskRecord, TaskSnapshot, TaskSpec, TaskStatus};
use crate::core::Priority;
use crate::runtime::Spawn;
use crate::util::ids::TaskId;

/// Outcome of one execution attempt, reported by the spawned body.
struct ExecOutcome {
    task_id: TaskId,
    epoch: u64,
    result: TaskResult,
}

/// What one scheduling tick did, for hosts and tests.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TickReport {
    /// Tasks moved from `Pending` to `Running`.
    pub started: usize,
    /// Tasks that reached `Completed`.
    pub completed: usize,
    /// Tasks that reached terminal `Failed` (including dependency failures).
    pub failed: usize,
    /// Failed attempts re-queued for retry.
    pub retried: usize,
    /// Running tasks displaced back to the queue.
    pub preempted: usize,
    /// Tasks cancelled by their absolute deadline.
    pub cancelled: usize,
    /// Reservations force-released by the expiry sweep.
    pub swept: usize,
}

/// Resource-aware task scheduler.
///
/// Constructed with the ledger it draws reservations from; holds no global
/// state. Shared across threads behind an `Arc`.
pub struct Scheduler<P, E, S>
where
    P: TaskPayload,
    E: TaskExecutor<P>,
    S: Spawn,
{
    ledger: Arc<ReservationLedger>,
    settings: SchedulerSettings,
    events: EventBus,
    executor: E,
    spawner: S,
    tasks: Mutex<HashMap<TaskId, TaskRecord<P>>>,
    outcome_tx: Sender<ExecOutcome>,
    outcome_rx: Receiver<ExecOutcome>,
}

impl<P, E, S> Scheduler<P, E, S>
where
    P: TaskPayload,
    E: TaskExecutor<P>,
    S: Spawn,
{
    /// Create a scheduler over the given ledger.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the settings fail validation.
    pub fn new(
        ledger: Arc<ReservationLedger>,
        settings: SchedulerSettings,
        executor: E,
        spawner: S,
        events: EventBus,
    ) -> Result<Self, SchedulerError> {
        settings.validate().map_err(SchedulerError::InvalidConfig)?;
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            ledger,
            settings,
            events,
            executor,
            spawner,
            tasks: Mutex::new(HashMap::new()),
            outcome_tx,
            outcome_rx,
        })
    }

    /// The ledger this scheduler draws reservations from.
    pub fn ledger(&self) -> &Arc<ReservationLedger> {
        &self.ledger
    }

    /// Submit a task; returns immediately with its id.
    ///
    /// # Errors
    ///
    /// `UnknownPool` if a requirement references an unmanaged pool,
    /// `UnknownTask` if a dependency id was never submitted, and
    /// `DeadlineExceeded` if the deadline has already passed.
    pub fn submit(&self, spec: TaskSpec<P>, now_ms: u128) -> Result<TaskId, SchedulerError> {
        for req in &spec.requirements {
            if !self.ledger.has_pool(&req.pool_id) {
                return Err(SchedulerError::UnknownPool(req.pool_id.clone()));
            }
        }
        let id = TaskId::new();
        if let Some(deadline) = spec.deadline_ms {
            if deadline <= now_ms {
                return Err(SchedulerError::DeadlineExceeded { task_id: id });
            }
        }
        let mut tasks = self.tasks.lock();
        for dep in &spec.depends_on {
            if !tasks.contains_key(dep) {
                return Err(SchedulerError::UnknownTask(*dep));
            }
        }
        self.events.emit(SchedulerEvent::TaskSubmitted {
            task_id: id,
            name: spec.name.clone(),
            priority: spec.priority,
        }, now_ms);
        tracing::debug!(task = %id, name = %spec.name, "task submitted");
        tasks.insert(id, TaskRecord::new(id, spec, now_ms));
        Ok(id)
    }

    /// Cancel a task. Running tasks lose their reservations; pending tasks
    /// leave the queue. Cancelling a terminal task is a no-op.
    ///
    /// # Errors
    ///
    /// `UnknownTask` if the id was never submitted.
    pub fn cancel(
        &self,
        task_id: TaskId,
        reason: impl Into<String>,
        now_ms: u128,
    ) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.lock();
        let record = tasks
            .get(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;
        if record.status.is_terminal() {
            return Ok(());
        }
        self.finish_cancelled(&mut tasks, task_id, reason.into(), now_ms);
        self.propagate_dependency_failure(&mut tasks, task_id, now_ms);
        Ok(())
    }

    /// Snapshot one task.
    ///
    /// # Errors
    ///
    /// `UnknownTask` if the id was never submitted.
    pub fn status(&self, task_id: TaskId) -> Result<TaskSnapshot, SchedulerError> {
        self.tasks
            .lock()
            .get(&task_id)
            .map(TaskSnapshot::from)
            .ok_or(SchedulerError::UnknownTask(task_id))
    }

    /// Snapshot every tracked task, ordered by creation time.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.lock();
        let mut snapshots: Vec<TaskSnapshot> = tasks.values().map(TaskSnapshot::from).collect();
        snapshots.sort_by_key(|t| t.created_at_ms);
        snapshots
    }

    /// Number of tasks currently in `Running`.
    pub fn running_count(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|r| r.status == TaskStatus::Running)
            .count()
    }

    /// Number of tasks currently in `Pending`.
    pub fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|r| r.status == TaskStatus::Pending)
            .count()
    }

    /// Serialize the task arena for crash recovery. Storage is the host's
    /// concern; this only defines the record shape.
    pub fn checkpoint(&self) -> SchedulerCheckpoint<P> {
        let tasks = self.tasks.lock();
        let mut records: Vec<TaskRecord<P>> = tasks.values().cloned().collect();
        records.sort_by_key(|r| r.created_at_ms);
        SchedulerCheckpoint { tasks: records }
    }

    /// Rebuild the arena from a checkpoint. Tasks that were `Running` are
    /// demoted to `Pending` without consuming a retry: their reservations
    /// did not survive the restart, so the next tick re-grants and restarts
    /// them like a preemption.
    pub fn restore(&self, checkpoint: SchedulerCheckpoint<P>, now_ms: u128) {
        let mut tasks = self.tasks.lock();
        for mut record in checkpoint.tasks {
            if record.status == TaskStatus::Running {
                record.status = TaskStatus::Pending;
                record.held.clear();
                record.started_at_ms = None;
                record.overrun_flagged = false;
                record.attempt_epoch += 1;
                record.not_before_ms = now_ms;
            }
            tasks.insert(record.id, record);
        }
    }

    /// Run one scheduling round: drain outcomes, sweep expired reservations,
    /// enforce deadlines, then fill slots up to the concurrency ceiling.
    pub fn tick(&self, now_ms: u128) -> TickReport {
        let mut report = TickReport::default();
        let mut tasks = self.tasks.lock();

        self.drain_outcomes(&mut tasks, now_ms, &mut report);
        self.apply_sweep(&mut tasks, now_ms, &mut report);
        self.enforce_deadlines(&mut tasks, now_ms, &mut report);
        self.fill_slots(&mut tasks, now_ms, &mut report);

        report
    }

    /// Drive `tick` on the configured interval until the future is dropped.
    /// Hosts typically spawn this and abort it on shutdown.
    #[cfg(feature = "tokio-runtime")]
    pub async fn run(&self) {
        let interval = std::time::Duration::from_millis(self.settings.tick_interval_ms);
        loop {
            tokio::time::sleep(interval).await;
            self.tick(crate::util::clock::now_ms());
        }
    }

    // ---- tick phases ----

    fn drain_outcomes(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        now_ms: u128,
        report: &mut TickReport,
    ) {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            outcomes.push(outcome);
        }
        for outcome in outcomes {
            let stale = match tasks.get(&outcome.task_id) {
                Some(record) => {
                    record.status != TaskStatus::Running || record.attempt_epoch != outcome.epoch
                }
                None => true,
            };
            if stale {
                // Outcome of a preempted or cancelled attempt.
                continue;
            }
            match outcome.result {
                Ok(value) => {
                    self.finish_completed(tasks, outcome.task_id, value, now_ms);
                    report.completed += 1;
                }
                Err(reason) => self.fail_attempt(tasks, outcome.task_id, reason, now_ms, report),
            }
        }
    }

    fn apply_sweep(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        now_ms: u128,
        report: &mut TickReport,
    ) {
        for expired in self.ledger.sweep_expired(now_ms) {
            report.swept += 1;
            let lost_running = tasks
                .get_mut(&expired.task_id)
                .filter(|r| r.status == TaskStatus::Running)
                .map(|r| {
                    r.held.retain(|h| *h != expired.id);
                    r.id
                });
            if let Some(task_id) = lost_running {
                self.fail_attempt(
                    tasks,
                    task_id,
                    format!("reservation {} expired", expired.id),
                    now_ms,
                    report,
                );
            }
        }
    }

    fn enforce_deadlines(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        now_ms: u128,
        report: &mut TickReport,
    ) {
        let ids: Vec<TaskId> = tasks.keys().copied().collect();
        for id in ids {
            let (status, deadline_ms, started_at_ms, estimated_ms, overrun_flagged) =
                match tasks.get(&id) {
                    Some(r) => (
                        r.status,
                        r.spec.deadline_ms,
                        r.started_at_ms,
                        r.spec.estimated_duration_ms,
                        r.overrun_flagged,
                    ),
                    None => continue,
                };
            if status.is_terminal() {
                continue;
            }
            if deadline_ms.is_some_and(|deadline| deadline <= now_ms) {
                self.finish_cancelled(tasks, id, "deadline exceeded".into(), now_ms);
                self.propagate_dependency_failure(tasks, id, now_ms);
                report.cancelled += 1;
                continue;
            }
            if status == TaskStatus::Running && !overrun_flagged {
                let started = started_at_ms.unwrap_or(now_ms);
                let budget = (estimated_ms as f64 * self.settings.safety_factor) as u128;
                if now_ms > started + budget {
                    if let Some(record) = tasks.get_mut(&id) {
                        record.overrun_flagged = true;
                    }
                    let running_for_ms = now_ms - started;
                    self.events.emit(SchedulerEvent::TaskOverrun {
                        task_id: id,
                        running_for_ms,
                    }, now_ms);
                    tracing::warn!(task = %id, running_for_ms, "task exceeded estimated duration budget");
                }
            }
            // A pending task whose dependency already failed can never run.
            if status == TaskStatus::Pending {
                let broken_dep = tasks.get(&id).and_then(|record| {
                    record.spec.depends_on.iter().copied().find(|dep| {
                        tasks.get(dep).is_some_and(|d| {
                            d.status.is_terminal() && d.status != TaskStatus::Completed
                        })
                    })
                });
                if let Some(dep) = broken_dep {
                    self.finish_failed(
                        tasks,
                        id,
                        SchedulerError::DependencyUnsatisfiable {
                            task_id: id,
                            failed_dependency: dep,
                        }
                        .to_string(),
                        now_ms,
                    );
                    report.failed += 1;
                    self.propagate_dependency_failure(tasks, id, now_ms);
                }
            }
        }
    }

    fn fill_slots(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        now_ms: u128,
        report: &mut TickReport,
    ) {
        loop {
            let running: Vec<TaskId> = tasks
                .values()
                .filter(|r| r.status == TaskStatus::Running)
                .map(|r| r.id)
                .collect();
            let ready = self.ready_entries(tasks, now_ms);
            let Some(top) = ready.first() else {
                break;
            };

            if running.len() >= self.settings.max_concurrency {
                // Only critical work may displace running tasks for a slot.
                if top.priority != Priority::Critical {
                    break;
                }
                let victim = running
                    .iter()
                    .filter_map(|id| tasks.get(id))
                    .filter(|r| r.spec.priority < Priority::Critical)
                    .max_by_key(|r| (r.remaining_ms(now_ms), std::cmp::Reverse(r.spec.priority)))
                    .map(|r| r.id);
                let Some(victim_id) = victim else {
                    break;
                };
                self.preempt(tasks, victim_id, top.task_id, now_ms);
                report.preempted += 1;
                continue;
            }

            let mut slots = self.settings.max_concurrency - running.len();
            let mut progressed = false;
            for entry in &ready {
                if slots == 0 {
                    break;
                }
                if self.try_start(tasks, entry.task_id, now_ms, report) {
                    slots -= 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    // ---- transitions ----

    fn ready_entries(
        &self,
        tasks: &HashMap<TaskId, TaskRecord<P>>,
        now_ms: u128,
    ) -> Vec<ReadyEntry> {
        let mut ready: Vec<ReadyEntry> = tasks
            .values()
            .filter(|r| r.status == TaskStatus::Pending && r.not_before_ms <= now_ms)
            .filter(|r| {
                r.spec.depends_on.iter().all(|dep| {
                    tasks
                        .get(dep)
                        .is_some_and(|d| d.status == TaskStatus::Completed)
                })
            })
            .map(|r| ReadyEntry {
                task_id: r.id,
                priority: r.spec.priority,
                front_of_queue: r.front_of_queue,
                deadline_ms: r.spec.deadline_ms,
                created_at_ms: r.created_at_ms,
            })
            .collect();
        ready.sort();
        ready
    }

    /// Attempt an all-or-nothing grant and start the task. On capacity
    /// shortfall the task is re-queued with a short delay instead of being
    /// left half-reserved.
    fn try_start(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        task_id: TaskId,
        now_ms: u128,
        report: &mut TickReport,
    ) -> bool {
        let Some(record) = tasks.get(&task_id) else {
            return false;
        };
        let requirements = record.spec.requirements.clone();
        let priority = record.spec.priority;
        let name = record.spec.name.clone();
        let ttl_ms = self.reservation_ttl(record, now_ms);

        match self
            .ledger
            .reserve_all(&requirements, priority, ttl_ms, task_id, name, now_ms)
        {
            Ok(grant) => {
                // Reclamation victims belong to running tasks; re-queue them.
                for victim in &grant.reclaimed {
                    if victim.task_id != task_id
                        && tasks
                            .get(&victim.task_id)
                            .is_some_and(|r| r.status == TaskStatus::Running)
                    {
                        self.preempt(tasks, victim.task_id, task_id, now_ms);
                        report.preempted += 1;
                    }
                }
                let Some(record) = tasks.get_mut(&task_id) else {
                    // Arena entries are never dropped mid-tick; release the
                    // orphaned grant if that invariant is ever broken.
                    for reservation in grant.reservations {
                        self.ledger.release(reservation, now_ms);
                    }
                    return false;
                };
                record.attempt_epoch += 1;
                record.status = TaskStatus::Running;
                record.started_at_ms = Some(now_ms);
                record.front_of_queue = false;
                record.overrun_flagged = false;
                record.held = grant.reservations;
                let attempt = record.retry_count + 1;
                self.events.emit(SchedulerEvent::TaskTransition {
                    task_id,
                    status: TaskStatus::Running,
                    attempt,
                    reason: None,
                }, now_ms);
                tracing::info!(task = %task_id, attempt, "task started");
                self.spawn_attempt(record);
                report.started += 1;
                true
            }
            Err(SchedulerError::InsufficientCapacity { pool_id, .. }) => {
                if let Some(record) = tasks.get_mut(&task_id) {
                    record.not_before_ms = now_ms + u128::from(self.settings.requeue_delay_ms);
                }
                tracing::debug!(task = %task_id, pool = %pool_id, "re-queued on capacity shortfall");
                false
            }
            Err(err) => {
                self.fail_attempt(tasks, task_id, err.to_string(), now_ms, report);
                false
            }
        }
    }

    fn spawn_attempt(&self, record: &TaskRecord<P>) {
        let executor = self.executor.clone();
        let payload = record.spec.payload.clone();
        let ctx = TaskContext {
            task_id: record.id,
            name: record.spec.name.clone(),
            priority: record.spec.priority,
            attempt: record.retry_count + 1,
        };
        let tx = self.outcome_tx.clone();
        let task_id = record.id;
        let epoch = record.attempt_epoch;
        self.spawner.spawn(async move {
            let result = executor.execute(payload, ctx).await;
            let _ = tx.send(ExecOutcome {
                task_id,
                epoch,
                result,
            });
        });
    }

    /// TTL for a task's reservations: until its deadline when it has one,
    /// otherwise the estimated duration times the safety factor, floored at
    /// the configured default so the sweep stays a safety net.
    fn reservation_ttl(&self, record: &TaskRecord<P>, now_ms: u128) -> u64 {
        match record.spec.deadline_ms {
            Some(deadline) => u64::try_from(deadline.saturating_sub(now_ms)).unwrap_or(u64::MAX),
            None => {
                let padded =
                    (record.spec.estimated_duration_ms as f64 * self.settings.safety_factor) as u64;
                padded.max(self.settings.default_reservation_ttl_ms)
            }
        }
    }

    fn release_held(&self, record: &mut TaskRecord<P>, now_ms: u128) {
        for reservation in record.held.drain(..) {
            self.ledger.release(reservation, now_ms);
        }
    }

    fn finish_completed(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        task_id: TaskId,
        value: serde_json::Value,
        now_ms: u128,
    ) {
        if let Some(record) = tasks.get_mut(&task_id) {
            self.release_held(record, now_ms);
            record.status = TaskStatus::Completed;
            record.completed_at_ms = Some(now_ms);
            record.result = Some(value);
            let attempt = record.retry_count + 1;
            self.events.emit(SchedulerEvent::TaskTransition {
                task_id,
                status: TaskStatus::Completed,
                attempt,
                reason: None,
            }, now_ms);
            tracing::info!(task = %task_id, "task completed");
        }
    }

    fn finish_failed(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        task_id: TaskId,
        reason: String,
        now_ms: u128,
    ) {
        if let Some(record) = tasks.get_mut(&task_id) {
            self.release_held(record, now_ms);
            record.status = TaskStatus::Failed;
            record.completed_at_ms = Some(now_ms);
            record.failure = Some(reason.clone());
            record.attempt_epoch += 1;
            let attempt = record.retry_count + 1;
            self.events.emit(SchedulerEvent::TaskTransition {
                task_id,
                status: TaskStatus::Failed,
                attempt,
                reason: Some(reason),
            }, now_ms);
            tracing::warn!(task = %task_id, "task failed permanently");
        }
    }

    fn finish_cancelled(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        task_id: TaskId,
        reason: String,
        now_ms: u128,
    ) {
        if let Some(record) = tasks.get_mut(&task_id) {
            self.release_held(record, now_ms);
            record.status = TaskStatus::Cancelled;
            record.completed_at_ms = Some(now_ms);
            record.failure = Some(reason.clone());
            record.attempt_epoch += 1;
            let attempt = record.retry_count.max(1);
            self.events.emit(SchedulerEvent::TaskTransition {
                task_id,
                status: TaskStatus::Cancelled,
                attempt,
                reason: Some(reason),
            }, now_ms);
            tracing::info!(task = %task_id, "task cancelled");
        }
    }

    /// Handle a failed attempt: retry with exponential backoff while budget
    /// remains, otherwise fail permanently and break dependents.
    fn fail_attempt(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        task_id: TaskId,
        reason: String,
        now_ms: u128,
        report: &mut TickReport,
    ) {
        let Some(record) = tasks.get_mut(&task_id) else {
            return;
        };
        self.release_held(record, now_ms);
        if record.retry_count < record.spec.max_retries {
            let delay = self.backoff_delay(record.retry_count);
            record.retry_count += 1;
            record.status = TaskStatus::Pending;
            record.attempt_epoch += 1;
            record.not_before_ms = now_ms + u128::from(delay);
            record.overrun_flagged = false;
            let attempt = record.retry_count;
            self.events.emit(SchedulerEvent::TaskTransition {
                task_id,
                status: TaskStatus::Pending,
                attempt,
                reason: Some(reason.clone()),
            }, now_ms);
            tracing::info!(task = %task_id, attempt, delay_ms = delay, reason = %reason, "attempt failed, retrying");
            report.retried += 1;
        } else {
            let attempts = record.retry_count + 1;
            let exhausted = SchedulerError::RetriesExhausted { task_id, attempts };
            self.finish_failed(tasks, task_id, format!("{exhausted}: {reason}"), now_ms);
            report.failed += 1;
            self.propagate_dependency_failure(tasks, task_id, now_ms);
        }
    }

    fn backoff_delay(&self, retry_count: u32) -> u64 {
        let factor = 2u64.saturating_pow(retry_count.min(16));
        self.settings
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.settings.backoff_cap_ms)
    }

    /// Re-queue a running task at the front of its priority tier without
    /// consuming a retry. The in-flight body's outcome is invalidated by
    /// bumping the attempt epoch.
    fn preempt(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        victim_id: TaskId,
        displaced_by: TaskId,
        now_ms: u128,
    ) {
        if let Some(record) = tasks.get_mut(&victim_id) {
            self.release_held(record, now_ms);
            record.status = TaskStatus::Pending;
            record.attempt_epoch += 1;
            record.started_at_ms = None;
            record.front_of_queue = true;
            record.overrun_flagged = false;
            record.not_before_ms = now_ms;
            self.events.emit(SchedulerEvent::TaskPreempted {
                task_id: victim_id,
                displaced_by,
            }, now_ms);
            tracing::info!(task = %victim_id, by = %displaced_by, "task preempted");
        }
    }

    /// Mark every pending task that (transitively) depends on a permanently
    /// failed or cancelled task as failed. No silent skipping.
    fn propagate_dependency_failure(
        &self,
        tasks: &mut HashMap<TaskId, TaskRecord<P>>,
        failed_id: TaskId,
        now_ms: u128,
    ) {
        let mut queue = vec![failed_id];
        while let Some(broken) = queue.pop() {
            let dependents: Vec<TaskId> = tasks
                .values()
                .filter(|r| r.status == TaskStatus::Pending && r.spec.depends_on.contains(&broken))
                .map(|r| r.id)
                .collect();
            for dependent in dependents {
                self.finish_failed(
                    tasks,
                    dependent,
                    SchedulerError::DependencyUnsatisfiable {
                        task_id: dependent,
                        failed_dependency: broken,
                    }
                    .to_string(),
                    now_ms,
                );
                queue.push(dependent);
            }
        }
    }
}
