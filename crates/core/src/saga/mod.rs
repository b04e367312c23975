//! Saga declaration types.
//!
//! A [`SagaDefinition`] is an ordered list of [`StepGroup`]s, each holding
//! one or more [`StepDef`]s. Definitions are configuration: validated once
//! at declaration and read-only for the lifetime of every run that uses
//! them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::port::activity::ActivityId;

/// Errors raised when a saga declaration is invalid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SagaValidationError {
    #[error("saga '{0}' declares no steps")]
    Empty(String),

    #[error("duplicate step name: {0}")]
    DuplicateStepName(String),

    #[error("parallel group {0} is empty")]
    EmptyParallelGroup(usize),
}

/// Compensation declared for a forward step.
///
/// The input is declared explicitly; when `None`, the recorded output of
/// the forward step is used as the compensation input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationDef {
    pub activity: ActivityId,
    pub input: Option<Value>,
}

/// A declared unit of forward work. Immutable once declared for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
    /// Step name, unique within the saga.
    pub name: String,
    /// Target activity identifier.
    pub activity: ActivityId,
    /// Input payload handed to the activity.
    pub input: Value,
    /// Optional compensating action.
    pub compensation: Option<CompensationDef>,
}

impl StepDef {
    pub fn new(name: impl Into<String>, activity: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            activity: ActivityId::new(activity),
            input,
            compensation: None,
        }
    }

    /// Declare a compensation activity with an explicit input.
    pub fn with_compensation(mut self, activity: impl Into<String>, input: Value) -> Self {
        self.compensation = Some(CompensationDef {
            activity: ActivityId::new(activity),
            input: Some(input),
        });
        self
    }

    /// Declare a compensation activity whose input is the forward step's
    /// recorded output.
    pub fn with_compensation_from_output(mut self, activity: impl Into<String>) -> Self {
        self.compensation = Some(CompensationDef {
            activity: ActivityId::new(activity),
            input: None,
        });
        self
    }

    pub fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }
}

/// Closed set of step-group shapes interpreted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepGroup {
    /// A single sequential step.
    Single(StepDef),
    /// Fan-out/fan-in: all members are scheduled together and the run
    /// advances only once every member has a terminal outcome.
    Parallel(Vec<StepDef>),
}

impl StepGroup {
    /// All steps in this group, in declaration order.
    pub fn steps(&self) -> Vec<&StepDef> {
        match self {
            StepGroup::Single(step) => vec![step],
            StepGroup::Parallel(steps) => steps.iter().collect(),
        }
    }
}

/// A declared saga: name plus ordered step groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaDefinition {
    name: String,
    groups: Vec<StepGroup>,
}

impl SagaDefinition {
    /// Create a builder for declaring a saga.
    pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[StepGroup] {
        &self.groups
    }

    /// Look up a step by name across all groups.
    pub fn step(&self, name: &str) -> Option<&StepDef> {
        self.groups
            .iter()
            .flat_map(|g| g.steps())
            .find(|s| s.name == name)
    }

    /// Total number of declared steps.
    pub fn step_count(&self) -> usize {
        self.groups.iter().map(|g| g.steps().len()).sum()
    }
}

/// Builder for [`SagaDefinition`].
#[derive(Debug)]
pub struct SagaDefinitionBuilder {
    name: String,
    groups: Vec<StepGroup>,
}

impl SagaDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    /// Append a sequential step.
    pub fn step(mut self, step: StepDef) -> Self {
        self.groups.push(StepGroup::Single(step));
        self
    }

    /// Append a parallel group.
    pub fn parallel(mut self, steps: Vec<StepDef>) -> Self {
        self.groups.push(StepGroup::Parallel(steps));
        self
    }

    /// Validate and build the definition.
    pub fn build(self) -> Result<SagaDefinition, SagaValidationError> {
        if self.groups.is_empty() {
            return Err(SagaValidationError::Empty(self.name));
        }

        for (index, group) in self.groups.iter().enumerate() {
            if let StepGroup::Parallel(steps) = group {
                if steps.is_empty() {
                    return Err(SagaValidationError::EmptyParallelGroup(index));
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for group in &self.groups {
            for step in group.steps() {
                if !seen.insert(step.name.clone()) {
                    return Err(SagaValidationError::DuplicateStepName(step.name.clone()));
                }
            }
        }

        Ok(SagaDefinition {
            name: self.name,
            groups: self.groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builds_sequential_saga() {
        let saga = SagaDefinition::builder("order-fulfilment")
            .step(
                StepDef::new("reserve-inventory", "inventory.reserve", json!({"sku": "A"}))
                    .with_compensation("inventory.release", json!({"sku": "A"})),
            )
            .step(StepDef::new("charge-payment", "payments.charge", json!({"amount": 10})))
            .build()
            .unwrap();

        assert_eq!(saga.name(), "order-fulfilment");
        assert_eq!(saga.groups().len(), 2);
        assert_eq!(saga.step_count(), 2);
        assert!(saga.step("reserve-inventory").unwrap().has_compensation());
        assert!(!saga.step("charge-payment").unwrap().has_compensation());
        assert!(saga.step("unknown").is_none());
    }

    #[test]
    fn test_rejects_empty_saga() {
        let err = SagaDefinition::builder("empty").build().unwrap_err();
        assert_eq!(err, SagaValidationError::Empty("empty".to_string()));
    }

    #[test]
    fn test_rejects_duplicate_step_names() {
        let err = SagaDefinition::builder("dup")
            .step(StepDef::new("s1", "a", json!({})))
            .parallel(vec![
                StepDef::new("s2", "b", json!({})),
                StepDef::new("s1", "c", json!({})),
            ])
            .build()
            .unwrap_err();
        assert_eq!(err, SagaValidationError::DuplicateStepName("s1".to_string()));
    }

    #[test]
    fn test_rejects_empty_parallel_group() {
        let err = SagaDefinition::builder("p")
            .step(StepDef::new("s1", "a", json!({})))
            .parallel(vec![])
            .build()
            .unwrap_err();
        assert_eq!(err, SagaValidationError::EmptyParallelGroup(1));
    }

    #[test]
    fn test_compensation_input_modes() {
        let explicit = StepDef::new("s", "a", json!({})).with_compensation("undo-a", json!({"k": 1}));
        assert_eq!(
            explicit.compensation.as_ref().unwrap().input,
            Some(json!({"k": 1}))
        );

        let derived = StepDef::new("s", "a", json!({})).with_compensation_from_output("undo-a");
        assert!(derived.compensation.as_ref().unwrap().input.is_none());
    }
}
