//! Resiliency policies and the retry decision function.
//!
//! A [`ResiliencyPolicy`] is configuration attached to an activity class:
//! loaded once at startup through the [`PolicyRegistry`] builder and never
//! mutated mid-run. The [`evaluate`] function is pure: given the policy,
//! the attempt count, and the failure classification it returns a retry
//! decision, with capped exponential backoff and jitter.

pub mod circuit;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::event::FailureKind;
use crate::port::activity::ActivityId;

/// Retry, backoff, and circuit-breaker parameters for one activity class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResiliencyPolicy {
    /// Maximum total attempts (the first call counts as attempt 1).
    pub max_retries: u32,
    /// Base delay of the exponential backoff.
    pub backoff_base: Duration,
    /// Upper bound on any single backoff delay.
    pub backoff_cap: Duration,
    /// Timeout applied to each individual attempt.
    pub per_call_timeout: Duration,
    /// Consecutive transient failures before the circuit opens.
    pub circuit_trip_threshold: u32,
    /// How long an open circuit rejects calls before allowing a trial.
    pub circuit_cooldown: Duration,
}

impl Default for ResiliencyPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            per_call_timeout: Duration::from_secs(30),
            circuit_trip_threshold: 5,
            circuit_cooldown: Duration::from_secs(60),
        }
    }
}

impl ResiliencyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    pub fn with_circuit(mut self, trip_threshold: u32, cooldown: Duration) -> Self {
        self.circuit_trip_threshold = trip_threshold;
        self.circuit_cooldown = cooldown;
        self
    }
}

/// Decision returned by [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting the given delay.
    RetryAfter(Duration),
    /// Stop attempting; the failure is final for this invocation.
    GiveUp,
}

/// Pure retry decision: permanent failures never retry, transient ones
/// retry until `max_retries` attempts have been spent.
pub fn evaluate(policy: &ResiliencyPolicy, attempt: u32, failure: FailureKind) -> RetryDecision {
    match failure {
        FailureKind::Permanent => RetryDecision::GiveUp,
        FailureKind::Transient => {
            if attempt >= policy.max_retries {
                RetryDecision::GiveUp
            } else {
                RetryDecision::RetryAfter(backoff_delay(policy, attempt))
            }
        }
    }
}

/// Capped exponential backoff with jitter.
///
/// The raw delay doubles per attempt (`base * 2^(attempt-1)`, capped),
/// then is scaled by a random factor in `[0.5, 1.0]` so concurrent runs
/// retrying against the same dependency spread out instead of storming it
/// in lockstep.
pub fn backoff_delay(policy: &ResiliencyPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let raw = policy
        .backoff_base
        .saturating_mul(2u32.saturating_pow(exponent));
    let capped = raw.min(policy.backoff_cap);
    let factor = rand::thread_rng().gen_range(0.5..=1.0);
    capped.mul_f64(factor)
}

/// Immutable mapping from activity class to policy.
///
/// Built once at startup; lookups for unknown classes fall back to the
/// default policy.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    default_policy: ResiliencyPolicy,
    policies: HashMap<String, ResiliencyPolicy>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::new()
    }

    /// Registry holding only a default policy.
    pub fn with_default(policy: ResiliencyPolicy) -> Self {
        Self {
            default_policy: policy,
            policies: HashMap::new(),
        }
    }

    /// Policy for an activity class.
    pub fn policy_for(&self, activity: &ActivityId) -> &ResiliencyPolicy {
        self.policies
            .get(activity.as_str())
            .unwrap_or(&self.default_policy)
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_default(ResiliencyPolicy::default())
    }
}

/// Builder for [`PolicyRegistry`].
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    default_policy: Option<ResiliencyPolicy>,
    policies: HashMap<String, ResiliencyPolicy>,
}

impl PolicyRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback policy for unlisted activity classes.
    pub fn default_policy(mut self, policy: ResiliencyPolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    /// Attach a policy to an activity class.
    pub fn policy(mut self, activity_class: impl Into<String>, policy: ResiliencyPolicy) -> Self {
        self.policies.insert(activity_class.into(), policy);
        self
    }

    pub fn build(self) -> PolicyRegistry {
        PolicyRegistry {
            default_policy: self.default_policy.unwrap_or_default(),
            policies: self.policies,
        }
    }
}
