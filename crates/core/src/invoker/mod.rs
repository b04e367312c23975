//! Activity invoker: retry, timeout, and circuit breaking around a single
//! external call.
//!
//! The invoker wraps the injected [`ActivityClient`] capability. Each
//! attempt runs under the policy's per-call timeout; transient failures
//! are retried with backoff per the policy evaluator, permanent failures
//! fail immediately. Every attempt is reported to telemetry, but only the
//! final outcome reaches the caller (and hence the durable log).

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

use crate::event::FailureInfo;
use crate::policy::circuit::{CircuitBreakerRegistry, CircuitOpenError};
use crate::policy::{evaluate, PolicyRegistry, ResiliencyPolicy, RetryDecision};
use crate::port::activity::{ActivityClient, ActivityFailure, ActivityId};
use crate::telemetry::RunTelemetry;

/// Final outcome of an invocation after retries are spent.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The circuit for this activity class is open; no call was attempted.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The activity rejected the call; retrying would not help.
    #[error("permanent failure invoking '{activity}': {failure}")]
    Permanent {
        activity: ActivityId,
        failure: FailureInfo,
    },

    /// Transient failures persisted through every allowed attempt.
    #[error("retries exhausted invoking '{activity}' after {attempts} attempts: {last}")]
    RetriesExhausted {
        activity: ActivityId,
        attempts: u32,
        last: FailureInfo,
    },
}

impl InvokeError {
    /// Error descriptor to persist in the step's failure event.
    pub fn failure_info(&self) -> FailureInfo {
        match self {
            InvokeError::CircuitOpen(err) => FailureInfo::transient(err.to_string()),
            InvokeError::Permanent { failure, .. } => failure.clone(),
            InvokeError::RetriesExhausted { last, .. } => last.clone(),
        }
    }
}

/// Executes a single named unit of work with resiliency applied.
pub struct ActivityInvoker<C: ActivityClient> {
    client: Arc<C>,
    policies: Arc<PolicyRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    telemetry: Arc<dyn RunTelemetry>,
}

impl<C: ActivityClient> ActivityInvoker<C> {
    pub fn new(
        client: Arc<C>,
        policies: Arc<PolicyRegistry>,
        telemetry: Arc<dyn RunTelemetry>,
    ) -> Self {
        Self {
            client,
            policies,
            breakers: Arc::new(CircuitBreakerRegistry::new()),
            telemetry,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Invoke an activity, retrying transient failures per its policy.
    pub async fn invoke(&self, activity: &ActivityId, payload: &Value) -> Result<Value, InvokeError> {
        let policy = self.policies.policy_for(activity).clone();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.breakers.admit(activity, &policy).await?;

            let failure = match self.attempt_once(activity, payload, &policy, attempt).await {
                Ok(output) => {
                    self.breakers.record_success(activity).await;
                    return Ok(output);
                }
                Err(failure) => failure,
            };

            if failure.is_transient() {
                self.breakers.record_failure(activity, &policy).await;
            } else {
                // The dependency answered; a rejection says nothing about
                // its health.
                self.breakers.record_success(activity).await;
            }

            match evaluate(&policy, attempt, failure.kind()) {
                RetryDecision::RetryAfter(delay) => {
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(match failure {
                        ActivityFailure::Permanent(_) => InvokeError::Permanent {
                            activity: activity.clone(),
                            failure: FailureInfo::from(&failure),
                        },
                        ActivityFailure::Transient(_) => InvokeError::RetriesExhausted {
                            activity: activity.clone(),
                            attempts: attempt,
                            last: FailureInfo::from(&failure),
                        },
                    });
                }
            }
        }
    }

    /// One attempt under the per-call timeout. A timeout counts as a
    /// transient failure.
    async fn attempt_once(
        &self,
        activity: &ActivityId,
        payload: &Value,
        policy: &ResiliencyPolicy,
        attempt: u32,
    ) -> Result<Value, ActivityFailure> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            policy.per_call_timeout,
            self.client.invoke(activity, payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ActivityFailure::Transient(format!(
                "call timed out after {:?}",
                policy.per_call_timeout
            ))),
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(_) => self
                .telemetry
                .on_attempt(activity.as_str(), attempt, elapsed, None),
            Err(failure) => self.telemetry.on_attempt(
                activity.as_str(),
                attempt,
                elapsed,
                Some(&failure.to_string()),
            ),
        }

        outcome
    }
}
