//! Structured observability events.
//!
//! Components never share an ambient bus: the host registers sinks on an
//! [`EventBus`] it owns, and every emission is mirrored to `tracing` so the
//! events remain visible even with no sink attached.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::task::{Priority, TaskStatus};
use crate::util::ids::{InstanceId, ReservationId, TaskId};

/// Terminal state announced for a finished workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOutcome {
    /// Every step finished and no blocking step failed.
    Completed,
    /// A blocking step failed in at least one context.
    Failed,
    /// The instance was cancelled by the caller.
    Cancelled,
}

/// Lifecycle and accounting events emitted by the scheduler stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A task entered the pending queue.
    TaskSubmitted {
        /// Task identifier.
        task_id: TaskId,
        /// Task name.
        name: String,
        /// Submission priority.
        priority: Priority,
    },
    /// A task transitioned to a new status.
    TaskTransition {
        /// Task identifier.
        task_id: TaskId,
        /// New status.
        status: TaskStatus,
        /// Attempt number (1-based) for starts, last attempt otherwise.
        attempt: u32,
        /// Failure or cancellation reason, when applicable.
        reason: Option<String>,
    },
    /// A running task was displaced to free a slot or capacity.
    TaskPreempted {
        /// Task that was displaced.
        task_id: TaskId,
        /// Task whose start forced the displacement.
        displaced_by: TaskId,
    },
    /// A running task exceeded its estimated duration times the safety factor.
    TaskOverrun {
        /// Task identifier.
        task_id: TaskId,
        /// Milliseconds the task has been running.
        running_for_ms: u128,
    },
    /// A reservation was granted.
    ReservationGranted {
        /// Reservation identifier.
        reservation_id: ReservationId,
        /// Owning pool.
        pool_id: String,
        /// Reserved amount.
        amount: u64,
        /// Owning task.
        task_id: TaskId,
    },
    /// A reservation was released through the normal path.
    ReservationReleased {
        /// Reservation identifier.
        reservation_id: ReservationId,
        /// Owning pool.
        pool_id: String,
        /// Released amount.
        amount: u64,
    },
    /// A reservation was force-released to satisfy a higher-priority request.
    ReservationReclaimed {
        /// Reservation identifier.
        reservation_id: ReservationId,
        /// Owning pool.
        pool_id: String,
        /// Reclaimed amount.
        amount: u64,
        /// Task that owned the reclaimed reservation.
        task_id: TaskId,
    },
    /// A reservation outlived its TTL and was released by the sweep.
    ReservationExpired {
        /// Reservation identifier.
        reservation_id: ReservationId,
        /// Owning pool.
        pool_id: String,
        /// Released amount.
        amount: u64,
        /// Task that owned the expired reservation.
        task_id: TaskId,
    },
    /// A workflow instance reached a terminal state.
    WorkflowFinished {
        /// Instance identifier.
        instance_id: InstanceId,
        /// Terminal outcome.
        outcome: WorkflowOutcome,
    },
}

impl SchedulerEvent {
    /// Correlation id tying the event to its task or instance.
    pub fn correlation_id(&self) -> String {
        match self {
            Self::TaskSubmitted { task_id, .. }
            | Self::TaskTransition { task_id, .. }
            | Self::TaskPreempted { task_id, .. }
            | Self::TaskOverrun { task_id, .. }
            | Self::ReservationGranted { task_id, .. }
            | Self::ReservationReclaimed { task_id, .. }
            | Self::ReservationExpired { task_id, .. } => task_id.to_string(),
            Self::ReservationReleased { reservation_id, .. } => reservation_id.to_string(),
            Self::WorkflowFinished { instance_id, .. } => instance_id.to_string(),
        }
    }
}

/// An emitted event together with its correlation id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Correlation id (task or instance id rendered as a string).
    pub correlation_id: String,
    /// Emission timestamp, milliseconds since epoch.
    pub at_ms: u128,
    /// The event itself.
    pub event: SchedulerEvent,
}

/// Sink abstraction for event consumers.
pub trait EventSink: Send {
    /// Record an emitted event.
    fn record(&mut self, record: &EventRecord);
}

/// Fan-out point for scheduler events. Cloning shares the sink registry.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
}

impl EventBus {
    /// Create a bus with no sinks registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink owned by the caller.
    pub fn register(&self, sink: Box<dyn EventSink>) {
        self.sinks.lock().push(sink);
    }

    /// Emit an event to every registered sink and to `tracing`. The caller
    /// supplies the timestamp so emission stays deterministic under test.
    pub(crate) fn emit(&self, event: SchedulerEvent, now_ms: u128) {
        let record = EventRecord {
            correlation_id: event.correlation_id(),
            at_ms: now_ms,
            event,
        };
        tracing::debug!(correlation_id = %record.correlation_id, event = ?record.event, "scheduler event");
        let mut sinks = self.sinks.lock();
        for sink in sinks.iter_mut() {
            sink.record(&record);
        }
    }
}

/// Bounded in-memory sink for tests and development. Cloning shares the
/// underlying buffer so a handle kept by the test observes what the bus wrote.
#[derive(Clone)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<VecDeque<EventRecord>>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Snapshot of the stored events, oldest first.
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().iter().cloned().collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&mut self, record: &EventRecord) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(record.clone());
    }
}

/// Sink that forwards events over a crossbeam channel without blocking.
/// Events are dropped if the receiver lags on a bounded channel.
pub struct ChannelEventSink {
    tx: crossbeam_channel::Sender<EventRecord>,
}

impl ChannelEventSink {
    /// Wrap a sender owned by the caller.
    pub fn new(tx: crossbeam_channel::Sender<EventRecord>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn record(&mut self, record: &EventRecord) {
        let _ = self.tx.try_send(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_is_bounded() {
        let sink = InMemoryEventSink::new(2);
        let bus = EventBus::new();
        bus.register(Box::new(sink.clone()));
        for i in 0..3 {
            bus.emit(
                SchedulerEvent::TaskSubmitted {
                    task_id: TaskId::new(),
                    name: "t".into(),
                    priority: Priority::Low,
                },
                1_000 + i,
            );
        }
        let events = sink.events();
        assert_eq!(events.len(), 2);
        // Oldest record was evicted; timestamps are the caller's.
        assert_eq!(events[0].at_ms, 1_001);
        assert_eq!(events[1].at_ms, 1_002);
    }

    #[test]
    fn channel_sink_forwards() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let bus = EventBus::new();
        bus.register(Box::new(ChannelEventSink::new(tx)));
        let id = TaskId::new();
        bus.emit(
            SchedulerEvent::TaskSubmitted {
                task_id: id,
                name: "t".into(),
                priority: Priority::High,
            },
            2_000,
        );
        let record = rx.try_recv().unwrap();
        assert_eq!(record.correlation_id, id.to_string());
        assert_eq!(record.at_ms, 2_000);
    }
}
