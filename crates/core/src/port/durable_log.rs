//! Durable log port trait definition.
//!
//! The durable log is the single source of truth for a run: an
//! append-only, per-run ordered history of [`RunEvent`]s. Backends must
//! provide atomic appends with optimistic concurrency and monotonic read
//! order; nothing else is assumed about the storage engine.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::event::{RunEvent, RunId, SequenceNr};

/// Errors that can occur when operating on the durable log.
#[derive(Debug, thiserror::Error)]
pub enum DurableLogError<E> {
    /// Optimistic concurrency violation: the caller's expected sequence
    /// does not match the log's current tail. The caller must re-read and
    /// re-derive its decision.
    #[error("conflict: expected sequence {expected}, but tail is {actual}")]
    Conflict {
        /// The sequence the caller expected to append at.
        expected: u64,
        /// The sequence of the log's actual tail.
        actual: u64,
    },

    /// The requested run has no history.
    #[error("run not found: {run_id}")]
    NotFound { run_id: RunId },

    /// Backend-specific error.
    #[error("backend error: {0}")]
    Backend(E),
}

impl<E> DurableLogError<E> {
    pub fn conflict(expected: u64, actual: u64) -> Self {
        Self::Conflict { expected, actual }
    }

    pub fn not_found(run_id: RunId) -> Self {
        Self::NotFound { run_id }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl<E> From<E> for DurableLogError<E> {
    fn from(err: E) -> Self {
        DurableLogError::Backend(err)
    }
}

/// Trait for run history storage.
///
/// # Concurrency model
///
/// Appends use optimistic concurrency:
/// 1. `append` carries the sequence the caller expects to write at
///    (log tail + 1; the first event of a run is sequence 1).
/// 2. If the tail has moved, the log returns [`DurableLogError::Conflict`].
/// 3. The caller re-reads the history and retries its decision.
///
/// This is the sole mutual-exclusion mechanism across concurrent engine
/// instances for the same run; no lock is held across runs.
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// The backend error type for this implementation.
    type Error: Debug + Send + Sync + 'static;

    /// Append a single event at `expected_sequence`.
    ///
    /// The append is atomic: the event is either fully persisted or not
    /// visible at all. On success the log stamps and returns the assigned
    /// sequence number (equal to `expected_sequence`).
    ///
    /// # Errors
    ///
    /// [`DurableLogError::Conflict`] if the log's tail is not
    /// `expected_sequence - 1`.
    async fn append(
        &self,
        run_id: &RunId,
        expected_sequence: u64,
        event: RunEvent,
    ) -> Result<SequenceNr, DurableLogError<Self::Error>>;

    /// Read the complete history for a run, ordered from sequence 1.
    ///
    /// Returns an empty vector for an unknown run.
    async fn read(&self, run_id: &RunId) -> Result<Vec<RunEvent>, Self::Error>;

    /// Sequence number of the log's tail for a run (0 if no events).
    async fn current_sequence(&self, run_id: &RunId) -> Result<u64, Self::Error>;

    /// Whether the run has any events.
    async fn run_exists(&self, run_id: &RunId) -> Result<bool, Self::Error> {
        Ok(self.current_sequence(run_id).await? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection_helper() {
        let err: DurableLogError<std::io::Error> = DurableLogError::conflict(3, 5);
        assert!(err.is_conflict());
        assert!(err.to_string().contains("expected sequence 3"));

        let err: DurableLogError<std::io::Error> = DurableLogError::not_found(RunId::from("r1"));
        assert!(!err.is_conflict());
    }
}
