//! Activity invocation port.
//!
//! The core calls external services through this uniform capability; the
//! concrete transport (HTTP, gRPC, message queue) is supplied by the
//! surrounding system and opaque here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::{FailureInfo, FailureKind};

/// Unique identifier for an activity (forward step or compensation).
///
/// The identifier doubles as the activity class key for policy and
/// circuit-breaker lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub String);

impl ActivityId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by an activity invocation.
///
/// The transient/permanent split drives the retry decision: transient
/// failures are retried inside the invoker and never surfaced past it,
/// permanent failures fail the step immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivityFailure {
    #[error("transient activity failure: {0}")]
    Transient(String),

    #[error("permanent activity failure: {0}")]
    Permanent(String),
}

impl ActivityFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            ActivityFailure::Transient(_) => FailureKind::Transient,
            ActivityFailure::Permanent(_) => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ActivityFailure::Transient(_))
    }
}

impl From<&ActivityFailure> for FailureInfo {
    fn from(failure: &ActivityFailure) -> Self {
        match failure {
            ActivityFailure::Transient(message) => FailureInfo::transient(message.clone()),
            ActivityFailure::Permanent(message) => FailureInfo::permanent(message.clone()),
        }
    }
}

/// Capability for executing a single named unit of work against an
/// external service.
///
/// Implementations own the transport. A call should return
/// [`ActivityFailure::Transient`] for outcomes worth retrying (timeouts,
/// 5xx-equivalent) and [`ActivityFailure::Permanent`] for outcomes that
/// will not succeed on retry (validation, 4xx-equivalent).
#[async_trait]
pub trait ActivityClient: Send + Sync {
    async fn invoke(&self, activity: &ActivityId, payload: &Value) -> Result<Value, ActivityFailure>;
}
