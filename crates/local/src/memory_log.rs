//! In-memory implementation of the durable log.
//!
//! Thread-safe and fully conformant with the append contract, without
//! requiring a database. Suited to tests, development, and single-process
//! deployments that accept losing history on restart.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::convert::Infallible;

use saga_runtime_core::event::{RunEvent, RunId, SequenceNr};
use saga_runtime_core::port::durable_log::{DurableLog, DurableLogError};

/// In-memory durable log.
///
/// # Thread safety
///
/// Uses `parking_lot::RwLock`: readers run concurrently, appends take the
/// write lock for the whole check-then-push so the optimistic concurrency
/// check cannot race with a concurrent append.
#[derive(Debug, Default)]
pub struct InMemoryDurableLog {
    streams: RwLock<HashMap<RunId, Vec<RunEvent>>>,
}

impl InMemoryDurableLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs with at least one event.
    pub fn run_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Drop all history. Useful between test cases sharing a log.
    pub fn clear(&self) {
        self.streams.write().clear();
    }
}

#[async_trait]
impl DurableLog for InMemoryDurableLog {
    type Error = Infallible;

    async fn append(
        &self,
        run_id: &RunId,
        expected_sequence: u64,
        mut event: RunEvent,
    ) -> Result<SequenceNr, DurableLogError<Self::Error>> {
        let mut streams = self.streams.write();
        let stream = streams.entry(run_id.clone()).or_default();

        let tail = stream.len() as u64;
        if expected_sequence != tail + 1 {
            return Err(DurableLogError::conflict(expected_sequence, tail));
        }

        let sequence = SequenceNr(expected_sequence);
        event.sequence = sequence;
        stream.push(event);
        Ok(sequence)
    }

    async fn read(&self, run_id: &RunId) -> Result<Vec<RunEvent>, Self::Error> {
        Ok(self
            .streams
            .read()
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn current_sequence(&self, run_id: &RunId) -> Result<u64, Self::Error> {
        Ok(self
            .streams
            .read()
            .get(run_id)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_append_assigns_dense_sequences_from_one() {
        let log = InMemoryDurableLog::new();
        let run_id = RunId::from("r1");

        let seq = log
            .append(&run_id, 1, RunEvent::step_scheduled(run_id.clone(), "s1"))
            .await
            .unwrap();
        assert_eq!(seq, SequenceNr(1));

        let seq = log
            .append(
                &run_id,
                2,
                RunEvent::step_completed(run_id.clone(), "s1", json!({})),
            )
            .await
            .unwrap();
        assert_eq!(seq, SequenceNr(2));

        let events = log.read(&run_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, SequenceNr(1));
        assert_eq!(events[1].sequence, SequenceNr(2));
        assert_eq!(log.current_sequence(&run_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_expected_sequence_conflicts() {
        let log = InMemoryDurableLog::new();
        let run_id = RunId::from("r1");

        log.append(&run_id, 1, RunEvent::step_scheduled(run_id.clone(), "s1"))
            .await
            .unwrap();

        let err = log
            .append(&run_id, 1, RunEvent::step_scheduled(run_id.clone(), "s2"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // The losing write left no trace.
        assert_eq!(log.read(&run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exactly_one_concurrent_append_wins() {
        let log = Arc::new(InMemoryDurableLog::new());
        let run_id = RunId::from("contended");

        let mut handles = Vec::new();
        for i in 0..8 {
            let log = log.clone();
            let run_id = run_id.clone();
            handles.push(tokio::spawn(async move {
                log.append(
                    &run_id,
                    1,
                    RunEvent::step_scheduled(run_id.clone(), format!("s{i}")),
                )
                .await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(log.read(&run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_run_reads_empty() {
        let log = InMemoryDurableLog::new();
        let run_id = RunId::from("nope");

        assert!(log.read(&run_id).await.unwrap().is_empty());
        assert_eq!(log.current_sequence(&run_id).await.unwrap(), 0);
        assert!(!log.run_exists(&run_id).await.unwrap());
    }
}
