//! Workflow definitions, instances, and the orchestrator.

pub mod definition;
pub mod instance;
pub mod orchestrator;

pub use definition::{StepDefinition, WorkflowDefinition};
pub use instance::{StepState, WorkflowSnapshot, WorkflowStatus};
pub use orchestrator::{Orchestrator, StepRun};
