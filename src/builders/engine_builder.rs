//! Assemble the ledger, scheduler, and orchestrator from an `EngineConfig`.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::error::SchedulerError;
use crate::core::events::EventBus;
use crate::core::executor::TaskExecutor;
use crate::core::ledger::ReservationLedger;
use crate::core::scheduler::Scheduler;
use crate::runtime::Spawn;
use crate::workflow::orchestrator::{Orchestrator, StepRun};

/// Build the full engine stack from validated configuration.
///
/// Components are wired by explicit injection: the scheduler holds the
/// ledger, the orchestrator holds the scheduler, and all of them share the
/// caller's [`EventBus`].
///
/// # Errors
///
/// `InvalidConfig` if the configuration fails validation.
pub fn build_engine<E, S>(
    cfg: &EngineConfig,
    executor: E,
    spawner: S,
    events: EventBus,
) -> Result<(Arc<ReservationLedger>, Orchestrator<E, S>), SchedulerError>
where
    E: TaskExecutor<StepRun>,
    S: Spawn,
{
    cfg.validate().map_err(SchedulerError::InvalidConfig)?;

    let ledger = Arc::new(ReservationLedger::new(
        cfg.pools
            .iter()
            .map(|p| (p.id.clone(), p.kind, p.capacity)),
        events.clone(),
    )?);
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&ledger),
        cfg.settings.clone(),
        executor,
        spawner,
        events.clone(),
    )?);
    let orchestrator = Orchestrator::new(scheduler, cfg.workflows.iter().cloned(), events)?;
    Ok((ledger, orchestrator))
}
