//! Lock store port trait definition.
//!
//! Backed by an externally supplied store offering atomic compare-and-set
//! with expiry. The [`crate::lock::LockManager`] builds lease semantics on
//! top of this port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A named resource guard held by one owner until expiry.
///
/// Invariant: at most one non-expired record exists per resource at any
/// instant; enforcing that atomically is the store's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Trait for atomic lock record storage.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// The backend error type for this implementation.
    type Error: Debug + Send + Sync + 'static;

    /// Atomically install `record` if the resource is free or its current
    /// record has expired. Returns `true` if installed.
    async fn try_put(&self, record: LockRecord) -> Result<bool, Self::Error>;

    /// Remove the record for `resource` if held by `owner` and not
    /// expired. Returns `true` if removed.
    async fn remove_if_owner(&self, resource: &str, owner: &str) -> Result<bool, Self::Error>;

    /// Current record for `resource`, expired or not.
    async fn get(&self, resource: &str) -> Result<Option<LockRecord>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        let live = LockRecord {
            resource: "warehouse-7".to_string(),
            owner: "run-a".to_string(),
            expires_at: now + Duration::seconds(30),
        };
        assert!(!live.is_expired_at(now));

        let stale = LockRecord {
            expires_at: now - Duration::seconds(1),
            ..live
        };
        assert!(stale.is_expired_at(now));
    }
}
