//! In-memory implementation of the lock store.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::convert::Infallible;

use saga_runtime_core::port::lock_store::{LockRecord, LockStore};

/// In-memory lock store.
///
/// Compare-and-set runs under a single write lock, so at most one caller
/// can install a record for a resource. Expired records are treated as
/// absent and overwritten in place.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    records: RwLock<HashMap<String, LockRecord>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all records. Useful between test cases sharing a store.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    type Error = Infallible;

    async fn try_put(&self, record: LockRecord) -> Result<bool, Self::Error> {
        let mut records = self.records.write();
        match records.get(&record.resource) {
            Some(current) if !current.is_expired_at(Utc::now()) => Ok(false),
            _ => {
                records.insert(record.resource.clone(), record);
                Ok(true)
            }
        }
    }

    async fn remove_if_owner(&self, resource: &str, owner: &str) -> Result<bool, Self::Error> {
        let mut records = self.records.write();
        match records.get(resource) {
            Some(current) if current.owner == owner && !current.is_expired_at(Utc::now()) => {
                records.remove(resource);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, resource: &str) -> Result<Option<LockRecord>, Self::Error> {
        Ok(self.records.read().get(resource).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(resource: &str, owner: &str, ttl_ms: i64) -> LockRecord {
        LockRecord {
            resource: resource.to_string(),
            owner: owner.to_string(),
            expires_at: Utc::now() + Duration::milliseconds(ttl_ms),
        }
    }

    #[tokio::test]
    async fn test_cas_rejects_second_writer() {
        let store = InMemoryLockStore::new();

        assert!(store.try_put(record("res", "a", 30_000)).await.unwrap());
        assert!(!store.try_put(record("res", "b", 30_000)).await.unwrap());

        let current = store.get("res").await.unwrap().unwrap();
        assert_eq!(current.owner, "a");
    }

    #[tokio::test]
    async fn test_expired_record_is_replaceable() {
        let store = InMemoryLockStore::new();

        assert!(store.try_put(record("res", "a", -1)).await.unwrap());
        assert!(store.try_put(record("res", "b", 30_000)).await.unwrap());

        let current = store.get("res").await.unwrap().unwrap();
        assert_eq!(current.owner, "b");
    }

    #[tokio::test]
    async fn test_remove_checks_ownership_and_expiry() {
        let store = InMemoryLockStore::new();

        store.try_put(record("res", "a", 30_000)).await.unwrap();
        assert!(!store.remove_if_owner("res", "b").await.unwrap());
        assert!(store.remove_if_owner("res", "a").await.unwrap());
        assert!(store.get("res").await.unwrap().is_none());

        // Removing an expired record is a no-op even for its owner.
        store.try_put(record("res", "a", -1)).await.unwrap();
        assert!(!store.remove_if_owner("res", "a").await.unwrap());
    }
}
