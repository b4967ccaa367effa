//! Shared utilities.

pub mod clock;
pub mod ids;
pub mod telemetry;

pub use clock::now_ms;
pub use ids::{InstanceId, ReservationId, TaskId};
pub use telemetry::init_tracing;
