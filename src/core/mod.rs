//! Core scheduling abstractions: pools, ledger, tasks, and the scheduler.

pub mod checkpoint;
pub mod error;
pub mod events;
pub mod executor;
pub mod ledger;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use checkpoint::{SchedulerCheckpoint, WorkflowCheckpoint};
pub use error::{AppResult, SchedulerError};
pub use events::{
    ChannelEventSink, EventBus, EventRecord, EventSink, InMemoryEventSink, SchedulerEvent,
    WorkflowOutcome,
};
pub use executor::{TaskContext, TaskExecutor, TaskPayload, TaskResult};
pub use ledger::{Grant, Reservation, ReservationLedger};
pub use pool::{PoolSnapshot, ResourceKind, ResourcePool};
pub use queue::ReadyEntry;
pub use scheduler::{Scheduler, TickReport};
pub use task::{
    Priority, ResourceRequirement, TaskRecord, TaskSnapshot, TaskSpec, TaskStatus,
};
