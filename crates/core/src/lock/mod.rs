//! Distributed lock manager.
//!
//! Guards critical sections shared across concurrent runs or services,
//! on top of a [`LockStore`] offering atomic compare-and-set with expiry.
//! Locks expire after their ttl even without release, so a crashed owner
//! cannot deadlock the resource; callers must treat the critical section
//! as best-effort-protected across an expiry boundary and keep it shorter
//! than the ttl.

use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::port::lock_store::{LockRecord, LockStore};

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError<E> {
    /// The resource is held by a non-expired lock. Retry with backoff or
    /// abandon the critical section.
    #[error("lock unavailable for resource '{resource}'")]
    Unavailable { resource: String },

    /// Backend-specific error.
    #[error("lock store error: {0}")]
    Store(E),
}

/// Outcome of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The caller no longer owned the lock (expired or taken over). This
    /// is reported, not fatal.
    NotOwner,
}

/// Lease-style lock manager over a [`LockStore`].
pub struct LockManager<S: LockStore> {
    store: S,
}

impl<S: LockStore> LockManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Acquire `resource` for `owner` until `ttl` elapses.
    ///
    /// Returns [`LockError::Unavailable`] if a non-expired lock exists,
    /// regardless of who holds it (acquisition is not reentrant).
    pub async fn try_acquire(
        &self,
        resource: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<LockRecord, LockError<S::Error>> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let record = LockRecord {
            resource: resource.to_string(),
            owner: owner.to_string(),
            expires_at,
        };

        let installed = self
            .store
            .try_put(record.clone())
            .await
            .map_err(LockError::Store)?;

        if installed {
            Ok(record)
        } else {
            Err(LockError::Unavailable {
                resource: resource.to_string(),
            })
        }
    }

    /// Release `resource` if still owned by `owner`.
    ///
    /// A non-owner release (wrong owner, or after expiry) is reported via
    /// telemetry and returned as [`ReleaseOutcome::NotOwner`]; it is never
    /// an error.
    pub async fn release(
        &self,
        resource: &str,
        owner: &str,
    ) -> Result<ReleaseOutcome, LockError<S::Error>> {
        let removed = self
            .store
            .remove_if_owner(resource, owner)
            .await
            .map_err(LockError::Store)?;

        if removed {
            Ok(ReleaseOutcome::Released)
        } else {
            warn!(
                resource = resource,
                owner = owner,
                "release ignored: caller does not own the lock"
            );
            Ok(ReleaseOutcome::NotOwner)
        }
    }
}
