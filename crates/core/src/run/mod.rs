//! Run state as a pure fold over the event history.
//!
//! A [`RunState`] is never persisted; it is recomputed on demand by
//! replaying the run's events in sequence order against the saga
//! declaration. Replaying the same history always yields the same state,
//! which is what makes crash recovery a plain re-read.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::event::{EventKind, FailureInfo, RunEvent, RunId};
use crate::saga::{SagaDefinition, StepDef};

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Declared but no step scheduled yet.
    Pending,
    /// Forward steps in progress.
    Running,
    /// Unwinding completed steps after an unrecoverable failure or a
    /// cancellation request.
    Compensating,
    /// Final step succeeded.
    Completed,
    /// Terminal failure requiring operator intervention (a compensation
    /// failed unrecoverably, or nothing had completed when the run died).
    Failed,
    /// All scheduled compensations completed; partial work fully unwound.
    Compensated,
}

impl RunStatus {
    /// Terminal statuses never change again; the run is archived.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Compensated
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Compensating => "compensating",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Compensated => "compensated",
        };
        write!(f, "{s}")
    }
}

/// Recorded outcome of a forward step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepOutcome {
    Scheduled,
    Completed(Value),
    Failed(FailureInfo),
}

/// Recorded outcome of a compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompensationOutcome {
    Scheduled,
    Completed,
    Failed(FailureInfo),
}

/// In-memory view of one run, derived exclusively from its events.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Index of the next step group to schedule.
    pub cursor: usize,
    pub step_outcomes: HashMap<String, StepOutcome>,
    pub compensations: HashMap<String, CompensationOutcome>,
    /// Steps with a `StepCompleted` event, in completion order. Drives
    /// LIFO compensation ordering.
    pub completion_order: Vec<String>,
    /// Final output, when the run completed.
    pub output: Option<Value>,
    /// Terminal failure descriptor, when the run failed.
    pub failure: Option<FailureInfo>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Sequence the next append is expected to land at (tail + 1).
    pub next_sequence: u64,
}

impl RunState {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            cursor: 0,
            step_outcomes: HashMap::new(),
            compensations: HashMap::new(),
            completion_order: Vec::new(),
            output: None,
            failure: None,
            created_at: None,
            updated_at: None,
            next_sequence: 1,
        }
    }

    /// Fold the full event history left-to-right into a state.
    pub fn replay(run_id: RunId, saga: &SagaDefinition, events: &[RunEvent]) -> Self {
        let mut state = Self::new(run_id);
        for event in events {
            state.apply(saga, event);
        }
        state
    }

    /// Apply a single event. Events must arrive in sequence order.
    pub fn apply(&mut self, saga: &SagaDefinition, event: &RunEvent) {
        match event.kind {
            EventKind::StepScheduled => {
                if self.status == RunStatus::Pending {
                    self.status = RunStatus::Running;
                }
                if let Some(step) = &event.step {
                    self.step_outcomes
                        .entry(step.clone())
                        .or_insert(StepOutcome::Scheduled);
                }
            }
            EventKind::StepCompleted => {
                if self.status == RunStatus::Pending {
                    self.status = RunStatus::Running;
                }
                if let Some(step) = &event.step {
                    let output = event.output.clone().unwrap_or(Value::Null);
                    self.step_outcomes
                        .insert(step.clone(), StepOutcome::Completed(output));
                    if !self.completion_order.contains(step) {
                        self.completion_order.push(step.clone());
                    }
                    self.recompute_cursor(saga);
                }
            }
            EventKind::StepFailed => {
                if let Some(step) = &event.step {
                    let error = event
                        .error
                        .clone()
                        .unwrap_or_else(|| FailureInfo::permanent("unspecified step failure"));
                    self.step_outcomes.insert(step.clone(), StepOutcome::Failed(error));
                }
                if matches!(self.status, RunStatus::Pending | RunStatus::Running) {
                    self.status = RunStatus::Compensating;
                }
                self.normalize(saga);
            }
            EventKind::CompensationScheduled => {
                // Cancellation routes here without a preceding StepFailed.
                if matches!(self.status, RunStatus::Pending | RunStatus::Running) {
                    self.status = RunStatus::Compensating;
                }
                if let Some(step) = &event.step {
                    self.compensations
                        .entry(step.clone())
                        .or_insert(CompensationOutcome::Scheduled);
                }
                // A bare schedule event (no step) marks an unwind with
                // nothing to undo; normalizing here lets replay derive
                // the terminal status from it.
                self.normalize(saga);
            }
            EventKind::CompensationCompleted => {
                if let Some(step) = &event.step {
                    self.compensations
                        .insert(step.clone(), CompensationOutcome::Completed);
                }
                self.normalize(saga);
            }
            EventKind::CompensationFailed => {
                if let Some(step) = &event.step {
                    let error = event.error.clone().unwrap_or_else(|| {
                        FailureInfo::permanent("unspecified compensation failure")
                    });
                    self.compensations
                        .insert(step.clone(), CompensationOutcome::Failed(error));
                }
            }
            EventKind::RunCompleted => {
                self.status = RunStatus::Completed;
                self.output = event.output.clone();
            }
            EventKind::RunFailed => {
                self.status = RunStatus::Failed;
                self.failure = event.error.clone();
            }
        }

        if self.created_at.is_none() {
            self.created_at = Some(event.timestamp);
        }
        self.updated_at = Some(event.timestamp);
        self.next_sequence = event.sequence.0 + 1;
    }

    /// Whether the step has a recorded `StepCompleted` outcome.
    pub fn step_completed(&self, name: &str) -> bool {
        matches!(self.step_outcomes.get(name), Some(StepOutcome::Completed(_)))
    }

    /// Recorded output of a completed step.
    pub fn step_output(&self, name: &str) -> Option<&Value> {
        match self.step_outcomes.get(name) {
            Some(StepOutcome::Completed(output)) => Some(output),
            _ => None,
        }
    }

    /// Whether any forward step has failed unrecoverably.
    pub fn has_failed_step(&self) -> bool {
        self.step_outcomes
            .values()
            .any(|o| matches!(o, StepOutcome::Failed(_)))
    }

    /// Whether any compensation has failed unrecoverably.
    pub fn failed_compensation(&self) -> Option<(&str, &FailureInfo)> {
        self.compensations.iter().find_map(|(step, outcome)| match outcome {
            CompensationOutcome::Failed(error) => Some((step.as_str(), error)),
            _ => None,
        })
    }

    /// Completed steps that declare a compensation, in reverse completion
    /// order (LIFO). Steps without a compensation are skipped: they are
    /// treated as already compensated.
    pub fn compensation_plan<'a>(&self, saga: &'a SagaDefinition) -> Vec<&'a StepDef> {
        self.completion_order
            .iter()
            .rev()
            .filter_map(|name| saga.step(name))
            .filter(|step| step.has_compensation())
            .collect()
    }

    /// Advance the cursor past every leading group whose members have all
    /// completed.
    fn recompute_cursor(&mut self, saga: &SagaDefinition) {
        let groups = saga.groups();
        while self.cursor < groups.len()
            && groups[self.cursor]
                .steps()
                .iter()
                .all(|s| self.step_completed(&s.name))
        {
            self.cursor += 1;
        }
    }

    /// Derive the `Compensated` terminal status once every planned
    /// compensation has completed. Runs that failed before completing any
    /// step stay `Compensating`; the engine closes them with `RunFailed`.
    fn normalize(&mut self, saga: &SagaDefinition) {
        if self.status != RunStatus::Compensating || self.completion_order.is_empty() {
            return;
        }
        let fully_unwound = self.compensation_plan(saga).iter().all(|step| {
            matches!(
                self.compensations.get(&step.name),
                Some(CompensationOutcome::Completed)
            )
        });
        if fully_unwound {
            self.status = RunStatus::Compensated;
        }
    }
}
