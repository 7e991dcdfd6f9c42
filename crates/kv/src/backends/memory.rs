//! In-process lock store backend.
//!
//! Suitable for single-instance deployments and tests. Locks are not visible
//! to other processes.

use crate::error::KvResult;
use crate::traits::KvStore;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// DashMap-backed store with lazy expiry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live());
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawn a task that purges expired entries every `interval`.
///
/// The task holds a weak reference and exits once the store is dropped.
pub fn spawn_purge_task(store: &Arc<MemoryStore>, interval: Duration) -> JoinHandle<()> {
    let store = Arc::downgrade(store);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(store) = store.upgrade() else {
                tracing::debug!("memory lock store dropped, purge task exiting");
                break;
            };
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired lock store entries");
            }
        }
    })
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool> {
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    return Ok(false);
                }
                occupied.insert(Entry::new(value, ttl));
                Ok(true)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool> {
        Ok(self
            .entries
            .remove_if(key, |_, entry| entry.is_live() && entry.value == expected)
            .is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        self.entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_live());
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live()))
    }

    async fn health_check(&self) -> KvResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_nx_respects_live_entries() {
        let store = MemoryStore::new();
        assert!(store.set_nx("k", "a", Duration::from_secs(60)).await.unwrap());
        assert!(!store.set_nx("k", "b", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_set_nx_replaces_expired_entry() {
        let store = MemoryStore::new();
        assert!(store.set_nx("k", "a", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.set_nx("k", "b", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_compare_and_delete_checks_value() {
        let store = MemoryStore::new();
        store.set("k", "mine", Duration::from_secs(60)).await.unwrap();
        assert!(!store.compare_and_delete("k", "theirs").await.unwrap());
        assert!(store.compare_and_delete("k", "mine").await.unwrap());
        assert!(!store.compare_and_delete("k", "mine").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_task_sweeps_and_stops_with_store() {
        let store = Arc::new(MemoryStore::new());
        store.set("upload:u-1:size", "10", Duration::from_millis(5)).await.unwrap();
        store.set("live", "1", Duration::from_secs(60)).await.unwrap();

        let handle = spawn_purge_task(&store, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.len(), 1);

        drop(store);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("purge task exits once the store is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_and_purge() {
        let store = MemoryStore::new();
        store.set("live", "1", Duration::from_secs(60)).await.unwrap();
        store.set("dead", "1", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.purge_expired(), 1);
        assert!(store.delete("live").await.unwrap());
        assert!(!store.delete("live").await.unwrap());
    }
}
