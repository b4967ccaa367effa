//! Workflow definitions: ordered step graphs with per-step resource
//! profiles, retry policies, and dependency edges.

use serde::{Deserialize, Serialize};

use crate::core::task::{Priority, ResourceRequirement};

fn default_priority() -> Priority {
    Priority::Medium
}

/// One named step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name, unique within the definition.
    pub name: String,
    /// Names of steps that must complete first. May only reference steps
    /// declared earlier in the definition.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Barrier steps gate their dependents on completion in *every*
    /// execution context, not just the dependent's own.
    #[serde(default)]
    pub barrier: bool,
    /// A blocking step's permanent failure in any context fails the whole
    /// instance; non-blocking failures are recorded and siblings continue.
    #[serde(default)]
    pub blocking: bool,
    /// Resource profile of one task expanded from this step.
    #[serde(default)]
    pub resources: Vec<ResourceRequirement>,
    /// Retry budget per (step, context) task.
    #[serde(default)]
    pub max_retries: u32,
    /// Estimated duration of one task in milliseconds.
    #[serde(default)]
    pub estimated_duration_ms: u64,
    /// Optional absolute deadline applied to every task of this step.
    #[serde(default)]
    pub deadline_ms: Option<u128>,
    /// Scheduling priority of the expanded tasks.
    #[serde(default = "default_priority")]
    pub priority: Priority,
}

/// A named workflow: an ordered list of steps expanded once per execution
/// context at start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Definition identifier, referenced by `Orchestrator::start`.
    pub id: String,
    /// Ordered steps.
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Validate the step graph.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first problem: empty
    /// step list, duplicate step names, or a dependency that is not an
    /// earlier-declared step.
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err("workflow must declare at least one step".into());
        }
        for (i, step) in self.steps.iter().enumerate() {
            if self.steps[..i].iter().any(|s| s.name == step.name) {
                return Err(format!("duplicate step name `{}`", step.name));
            }
            for dep in &step.depends_on {
                if dep == &step.name {
                    return Err(format!("step `{}` depends on itself", step.name));
                }
                if !self.steps[..i].iter().any(|s| &s.name == dep) {
                    return Err(format!(
                        "step `{}` depends on `{dep}`, which is not an earlier step",
                        step.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition {
            name: name.into(),
            depends_on: deps.iter().map(|d| (*d).into()).collect(),
            barrier: false,
            blocking: false,
            resources: vec![],
            max_retries: 0,
            estimated_duration_ms: 1_000,
            deadline_ms: None,
            priority: Priority::Medium,
        }
    }

    #[test]
    fn valid_chain_passes() {
        let def = WorkflowDefinition {
            id: "w".into(),
            steps: vec![
                step("collect", &[]),
                step("analyze", &["collect"]),
                step("report", &["analyze"]),
            ],
        };
        assert!(def.validate().is_ok());
    }

    #[test]
    fn forward_dependency_rejected() {
        let def = WorkflowDefinition {
            id: "w".into(),
            steps: vec![step("a", &["b"]), step("b", &[])],
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn duplicate_step_rejected() {
        let def = WorkflowDefinition {
            id: "w".into(),
            steps: vec![step("a", &[]), step("a", &[])],
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn definition_parses_from_json_with_defaults() {
        let def: WorkflowDefinition = serde_json::from_str(
            r#"{
                "id": "filings",
                "steps": [
                    { "name": "collect" },
                    { "name": "analyze", "depends_on": ["collect"], "blocking": true }
                ]
            }"#,
        )
        .unwrap();
        assert!(def.validate().is_ok());
        assert_eq!(def.steps[1].priority, Priority::Medium);
        assert!(def.steps[1].blocking);
        assert!(!def.steps[0].barrier);
    }
}
