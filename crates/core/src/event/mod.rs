//! Event types for saga runs.
//!
//! This module contains [`RunEvent`], [`EventKind`], and the identifier
//! newtypes that form the foundation of the event-sourced run history.
//! A run's state is never stored directly; it is always a fold over the
//! ordered sequence of its events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Sequence number of an event within a single run.
///
/// Sequence numbers are monotonically increasing and local to each run;
/// the first event of a run is sequence 1. They are assigned by the
/// durable log at append time, never by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceNr(pub u64);

impl std::fmt::Display for SequenceNr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run identifier type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a run ID from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Classification of an activity failure.
///
/// Transient failures (network timeout, 5xx-equivalent) are retried by the
/// invoker; permanent failures (validation, 4xx-equivalent) fail the step
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Serializable error descriptor carried by failure events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    pub kind: FailureKind,
}

impl FailureInfo {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl std::fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failure: {}", self.kind, self.message)
    }
}

/// Kind of events in a run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A forward step has been handed to the activity invoker.
    StepScheduled,
    /// A forward step completed successfully.
    StepCompleted,
    /// A forward step failed unrecoverably (permanent or retries exhausted).
    StepFailed,
    /// A compensation for a completed step has been scheduled.
    CompensationScheduled,
    /// A compensation completed successfully.
    CompensationCompleted,
    /// A compensation failed unrecoverably.
    CompensationFailed,
    /// The run reached its final step successfully.
    RunCompleted,
    /// The run is terminally failed and requires operator intervention.
    RunFailed,
}

impl EventKind {
    /// Returns true if this event concerns a forward step.
    pub fn is_step(&self) -> bool {
        matches!(
            self,
            EventKind::StepScheduled | EventKind::StepCompleted | EventKind::StepFailed
        )
    }

    /// Returns true if this event concerns a compensation.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            EventKind::CompensationScheduled
                | EventKind::CompensationCompleted
                | EventKind::CompensationFailed
        )
    }

    /// Returns true if this event closes the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::RunCompleted | EventKind::RunFailed)
    }
}

/// A single immutable fact in a run history.
///
/// Events are totally ordered per run by [`SequenceNr`]; replaying them in
/// order deterministically reproduces the run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Sequence of this event within the run. Assigned by the durable log;
    /// a freshly built event carries 0 until persisted.
    pub sequence: SequenceNr,

    /// The run this event belongs to.
    pub run_id: RunId,

    /// Kind of the event.
    pub kind: EventKind,

    /// Name of the step this event concerns, if any.
    pub step: Option<String>,

    /// When the event was created.
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Outcome payload for completion events.
    pub output: Option<Value>,

    /// Error descriptor for failure events.
    pub error: Option<FailureInfo>,
}

impl RunEvent {
    /// Create a builder for constructing a [`RunEvent`].
    pub fn builder(run_id: RunId, kind: EventKind) -> RunEventBuilder {
        RunEventBuilder::new(run_id, kind)
    }

    pub fn step_scheduled(run_id: RunId, step: impl Into<String>) -> Self {
        Self::builder(run_id, EventKind::StepScheduled)
            .step(step)
            .build()
    }

    pub fn step_completed(run_id: RunId, step: impl Into<String>, output: Value) -> Self {
        Self::builder(run_id, EventKind::StepCompleted)
            .step(step)
            .output(output)
            .build()
    }

    pub fn step_failed(run_id: RunId, step: impl Into<String>, error: FailureInfo) -> Self {
        Self::builder(run_id, EventKind::StepFailed)
            .step(step)
            .error(error)
            .build()
    }

    pub fn compensation_scheduled(run_id: RunId, step: impl Into<String>) -> Self {
        Self::builder(run_id, EventKind::CompensationScheduled)
            .step(step)
            .build()
    }

    pub fn compensation_completed(run_id: RunId, step: impl Into<String>, output: Value) -> Self {
        Self::builder(run_id, EventKind::CompensationCompleted)
            .step(step)
            .output(output)
            .build()
    }

    pub fn compensation_failed(run_id: RunId, step: impl Into<String>, error: FailureInfo) -> Self {
        Self::builder(run_id, EventKind::CompensationFailed)
            .step(step)
            .error(error)
            .build()
    }

    pub fn run_completed(run_id: RunId, output: Value) -> Self {
        Self::builder(run_id, EventKind::RunCompleted)
            .output(output)
            .build()
    }

    pub fn run_failed(run_id: RunId, error: FailureInfo) -> Self {
        Self::builder(run_id, EventKind::RunFailed)
            .error(error)
            .build()
    }
}

/// Builder for constructing [`RunEvent`].
#[derive(Debug)]
pub struct RunEventBuilder {
    run_id: RunId,
    kind: EventKind,
    step: Option<String>,
    output: Option<Value>,
    error: Option<FailureInfo>,
}

impl RunEventBuilder {
    pub fn new(run_id: RunId, kind: EventKind) -> Self {
        Self {
            run_id,
            kind,
            step: None,
            output: None,
            error: None,
        }
    }

    /// Set the step name this event concerns.
    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Set the outcome payload.
    pub fn output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Set the error descriptor.
    pub fn error(mut self, error: FailureInfo) -> Self {
        self.error = Some(error);
        self
    }

    /// Build the event. Sequence is left at 0 and stamped by the log.
    pub fn build(self) -> RunEvent {
        RunEvent {
            sequence: SequenceNr(0),
            run_id: self.run_id,
            kind: self.kind,
            step: self.step,
            timestamp: chrono::Utc::now(),
            output: self.output,
            error: self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_id_generation() {
        let a = RunId::new();
        let b = RunId::new();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_event_kind_classification() {
        assert!(EventKind::StepCompleted.is_step());
        assert!(!EventKind::StepCompleted.is_compensation());
        assert!(EventKind::CompensationFailed.is_compensation());
        assert!(EventKind::RunCompleted.is_terminal());
        assert!(EventKind::RunFailed.is_terminal());
        assert!(!EventKind::StepScheduled.is_terminal());
    }

    #[test]
    fn test_event_constructors() {
        let run_id = RunId::from("run-1");

        let completed =
            RunEvent::step_completed(run_id.clone(), "charge-payment", json!({"txn": "T-1"}));
        assert_eq!(completed.kind, EventKind::StepCompleted);
        assert_eq!(completed.step.as_deref(), Some("charge-payment"));
        assert_eq!(completed.output, Some(json!({"txn": "T-1"})));
        assert!(completed.error.is_none());

        let failed = RunEvent::step_failed(
            run_id.clone(),
            "charge-payment",
            FailureInfo::permanent("card declined"),
        );
        assert_eq!(failed.kind, EventKind::StepFailed);
        assert_eq!(failed.error.as_ref().map(|e| e.kind), Some(FailureKind::Permanent));

        let terminal = RunEvent::run_failed(run_id, FailureInfo::transient("gone"));
        assert!(terminal.kind.is_terminal());
        assert!(terminal.step.is_none());
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = RunEvent::step_completed(RunId::from("run-2"), "s1", json!({"ok": true}));
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: RunEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_failure_info_classification() {
        assert!(FailureInfo::transient("timeout").is_transient());
        assert!(!FailureInfo::permanent("bad input").is_transient());
    }
}
