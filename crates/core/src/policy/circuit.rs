//! Per-activity-class circuit breaker.
//!
//! After a policy's consecutive-failure threshold trips, invocations of
//! that activity class fail fast with [`CircuitOpenError`] until the
//! cooldown elapses; then exactly one trial invocation is admitted
//! (half-open) before the circuit fully closes or re-opens.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use super::ResiliencyPolicy;
use crate::port::activity::ActivityId;

/// Circuit states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Tripped; reject all calls until cooldown elapses.
    Open,
    /// Cooldown elapsed; one trial call in flight.
    HalfOpen,
}

/// Fast-fail error surfaced to the caller for backpressure.
#[derive(Debug, Error, Clone)]
#[error("circuit open for activity class '{activity}'")]
pub struct CircuitOpenError {
    pub activity: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    fn admit(&mut self, activity: &str, policy: &ResiliencyPolicy) -> Result<(), CircuitOpenError> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Err(self.open_error(activity))
                } else {
                    self.trial_in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or_else(Utc::now);
                let elapsed = Utc::now() - opened_at;
                let cooldown = chrono::Duration::from_std(policy.circuit_cooldown)
                    .unwrap_or(chrono::Duration::MAX);
                if elapsed >= cooldown {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(self.open_error(activity))
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.trial_in_flight = false;
        self.state = CircuitState::Closed;
        self.opened_at = None;
    }

    fn record_failure(&mut self, policy: &ResiliencyPolicy) {
        match self.state {
            CircuitState::HalfOpen => {
                // The trial failed: straight back to open.
                self.state = CircuitState::Open;
                self.opened_at = Some(Utc::now());
                self.trial_in_flight = false;
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= policy.circuit_trip_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Utc::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open_error(&self, activity: &str) -> CircuitOpenError {
        CircuitOpenError {
            activity: activity.to_string(),
            opened_at: self.opened_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Keyed registry of circuit breakers, one per activity class.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    entries: RwLock<HashMap<String, BreakerEntry>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a call to this activity class may proceed.
    ///
    /// An admitted half-open trial reserves the breaker: concurrent calls
    /// fail fast until the trial reports its outcome.
    pub async fn admit(
        &self,
        activity: &ActivityId,
        policy: &ResiliencyPolicy,
    ) -> Result<(), CircuitOpenError> {
        let mut entries = self.entries.write().await;
        entries
            .entry(activity.as_str().to_string())
            .or_insert_with(BreakerEntry::new)
            .admit(activity.as_str(), policy)
    }

    /// Record a successful (or permanently rejected, i.e. the dependency
    /// responded) call.
    pub async fn record_success(&self, activity: &ActivityId) {
        let mut entries = self.entries.write().await;
        entries
            .entry(activity.as_str().to_string())
            .or_insert_with(BreakerEntry::new)
            .record_success();
    }

    /// Record a transient failure.
    pub async fn record_failure(&self, activity: &ActivityId, policy: &ResiliencyPolicy) {
        let mut entries = self.entries.write().await;
        entries
            .entry(activity.as_str().to_string())
            .or_insert_with(BreakerEntry::new)
            .record_failure(policy);
    }

    /// Current state for an activity class.
    pub async fn state(&self, activity: &ActivityId) -> CircuitState {
        let entries = self.entries.read().await;
        entries
            .get(activity.as_str())
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Reset an activity class back to closed.
    pub async fn reset(&self, activity: &ActivityId) {
        let mut entries = self.entries.write().await;
        entries.remove(activity.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(threshold: u32, cooldown: Duration) -> ResiliencyPolicy {
        ResiliencyPolicy::default().with_circuit(threshold, cooldown)
    }

    #[tokio::test]
    async fn test_closed_circuit_admits() {
        let registry = CircuitBreakerRegistry::new();
        let activity = ActivityId::new("payments.charge");
        let policy = policy(3, Duration::from_secs(60));

        assert!(registry.admit(&activity, &policy).await.is_ok());
        assert_eq!(registry.state(&activity).await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_trips_after_consecutive_failures() {
        let registry = CircuitBreakerRegistry::new();
        let activity = ActivityId::new("payments.charge");
        let policy = policy(3, Duration::from_secs(60));

        for _ in 0..3 {
            registry.record_failure(&activity, &policy).await;
        }

        assert_eq!(registry.state(&activity).await, CircuitState::Open);
        assert!(registry.admit(&activity, &policy).await.is_err());
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_count() {
        let registry = CircuitBreakerRegistry::new();
        let activity = ActivityId::new("payments.charge");
        let policy = policy(3, Duration::from_secs(60));

        registry.record_failure(&activity, &policy).await;
        registry.record_failure(&activity, &policy).await;
        registry.record_success(&activity).await;
        registry.record_failure(&activity, &policy).await;
        registry.record_failure(&activity, &policy).await;

        assert_eq!(registry.state(&activity).await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_admits_exactly_one_trial() {
        let registry = CircuitBreakerRegistry::new();
        let activity = ActivityId::new("payments.charge");
        let policy = policy(1, Duration::from_millis(20));

        registry.record_failure(&activity, &policy).await;
        assert_eq!(registry.state(&activity).await, CircuitState::Open);
        assert!(registry.admit(&activity, &policy).await.is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;

        // One trial allowed, a second concurrent call is rejected.
        assert!(registry.admit(&activity, &policy).await.is_ok());
        assert_eq!(registry.state(&activity).await, CircuitState::HalfOpen);
        assert!(registry.admit(&activity, &policy).await.is_err());

        // Trial succeeds: circuit closes.
        registry.record_success(&activity).await;
        assert_eq!(registry.state(&activity).await, CircuitState::Closed);
        assert!(registry.admit(&activity, &policy).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_trial_reopens() {
        let registry = CircuitBreakerRegistry::new();
        let activity = ActivityId::new("payments.charge");
        let policy = policy(1, Duration::from_millis(20));

        registry.record_failure(&activity, &policy).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registry.admit(&activity, &policy).await.is_ok());

        registry.record_failure(&activity, &policy).await;
        assert_eq!(registry.state(&activity).await, CircuitState::Open);
        assert!(registry.admit(&activity, &policy).await.is_err());
    }
}
