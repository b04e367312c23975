//! Scripted activity client for deterministic failure-path testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use saga_runtime_core::port::activity::{ActivityClient, ActivityFailure, ActivityId};

/// One scripted response for an activity class.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Return the given output.
    Succeed(Value),
    /// Fail with a transient error (retried by the invoker).
    FailTransient(String),
    /// Fail with a permanent error (never retried).
    FailPermanent(String),
    /// Sleep long enough to trip the per-call timeout, then succeed. The
    /// duration must exceed the policy's timeout for the stall to count.
    Stall(Duration),
}

/// A recorded call to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub activity: String,
    pub payload: Value,
}

/// [`ActivityClient`] whose responses are scripted per activity class.
///
/// Outcomes are consumed front-to-back per class; once a script is
/// exhausted (or for unscripted classes) the client echoes the payload.
/// Every call is recorded, including retried attempts, so tests can
/// assert on attempt counts and invocation order.
#[derive(Debug, Default)]
pub struct ScriptedActivityClient {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedActivityClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for an activity class.
    pub fn script(self, activity: &str, outcomes: Vec<ScriptedOutcome>) -> Self {
        self.scripts
            .lock()
            .insert(activity.to_string(), outcomes.into());
        self
    }

    /// All recorded calls, in invocation order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    /// Activity names of all recorded calls, in invocation order.
    pub fn called_activities(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|i| i.activity.clone())
            .collect()
    }

    /// Number of calls made to one activity class.
    pub fn calls_for(&self, activity: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|i| i.activity == activity)
            .count()
    }
}

#[async_trait]
impl ActivityClient for ScriptedActivityClient {
    async fn invoke(
        &self,
        activity: &ActivityId,
        payload: &Value,
    ) -> Result<Value, ActivityFailure> {
        self.invocations.lock().push(Invocation {
            activity: activity.as_str().to_string(),
            payload: payload.clone(),
        });

        let outcome = self
            .scripts
            .lock()
            .get_mut(activity.as_str())
            .and_then(|queue| queue.pop_front());

        match outcome {
            None => Ok(payload.clone()),
            Some(ScriptedOutcome::Succeed(output)) => Ok(output),
            Some(ScriptedOutcome::FailTransient(message)) => {
                Err(ActivityFailure::Transient(message))
            }
            Some(ScriptedOutcome::FailPermanent(message)) => {
                Err(ActivityFailure::Permanent(message))
            }
            Some(ScriptedOutcome::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(payload.clone())
            }
        }
    }
}
