use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{DedupStore, StoreError};

/// An in-process stand-in for the shared store, honouring expirations.
///
/// Clones share the same keyspace, like several connections to one server.
/// `set_available(false)` makes every operation fail, to simulate an outage.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys, regardless of prefix.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock_entries()
            .values()
            .filter(|expires_at| **expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn set_if_absent(&self, key: String, ttl: Duration) -> Result<bool, StoreError> {
        self.check_available()?;

        let now = Instant::now();
        let mut entries = self.lock_entries();
        match entries.get(&key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                entries.insert(key, now + ttl);
                Ok(true)
            }
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;

        let now = Instant::now();
        let mut entries = self.lock_entries();
        entries.retain(|_, expires_at| *expires_at > now);

        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, keys: Vec<String>) -> Result<u64, StoreError> {
        self.check_available()?;

        let now = Instant::now();
        let mut entries = self.lock_entries();
        let deleted = keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|expires_at| *expires_at > now)
            .count();
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn set_if_absent_only_creates_once() {
        let store = MemoryStore::new();

        assert!(store.set_if_absent("ids:1".to_owned(), TTL).await.unwrap());
        assert!(!store.set_if_absent("ids:1".to_owned(), TTL).await.unwrap());
        assert!(store.set_if_absent("ids:2".to_owned(), TTL).await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn expired_keys_can_be_created_again() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(20);

        assert!(store.set_if_absent("ids:1".to_owned(), ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.is_empty());
        assert!(store.set_if_absent("ids:1".to_owned(), ttl).await.unwrap());
    }

    #[tokio::test]
    async fn scan_only_returns_matching_prefix() {
        let store = MemoryStore::new();
        for key in ["ids:1", "ids:2", "sessions:1"] {
            store.set_if_absent(key.to_owned(), TTL).await.unwrap();
        }

        let keys = store.scan_prefix("ids:").await.unwrap();

        assert_eq!(keys, vec!["ids:1".to_owned(), "ids:2".to_owned()]);
    }

    #[tokio::test]
    async fn delete_only_removes_given_keys() {
        let store = MemoryStore::new();
        for key in ["ids:1", "ids:2", "ids:3"] {
            store.set_if_absent(key.to_owned(), TTL).await.unwrap();
        }

        let deleted = store
            .delete(vec!["ids:1".to_owned(), "ids:2".to_owned(), "ids:9".to_owned()])
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(store.scan_prefix("ids:").await.unwrap(), vec!["ids:3"]);
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(store.set_if_absent("ids:1".to_owned(), TTL).await.is_err());
        assert!(store.scan_prefix("ids:").await.is_err());
        assert!(store.delete(vec!["ids:1".to_owned()]).await.is_err());

        store.set_available(true);
        assert!(store.set_if_absent("ids:1".to_owned(), TTL).await.unwrap());
    }
}
