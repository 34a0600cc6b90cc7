//! In-Memory Distributed Store
//!
//! A process-local implementation of the distributed store port with full
//! absolute/relative/sliding expiration semantics. Used for tests, local
//! development and single-node deployments. Availability can be toggled to
//! simulate an outage of the backing service.

use crate::cache::options::{add_duration, earliest};
use crate::cache::storage::{DistributedEntryOptions, DistributedStore, StoredBlob};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

// =============================================================================
// Stored Entry
// =============================================================================

#[derive(Debug, Clone)]
struct StoredEntry {
    data: Bytes,
    /// Hard deadline computed at write time
    deadline: Option<DateTime<Utc>>,
    sliding: Option<Duration>,
    /// Current expiry, moved forward by every access
    expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    fn slide(&mut self, now: DateTime<Utc>) {
        if let Some(window) = self.sliding {
            self.expires_at = earliest(self.deadline, add_duration(now, window));
        }
    }
}

// =============================================================================
// Operation Counters
// =============================================================================

/// Number of calls served by the store, per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOperationCounts {
    pub gets: u64,
    pub sets: u64,
    pub refreshes: u64,
    pub removes: u64,
}

// =============================================================================
// In-Memory Distributed Store
// =============================================================================

/// Process-local distributed store
pub struct InMemoryDistributedStore {
    store: RwLock<HashMap<String, StoredEntry>>,
    available: AtomicBool,
    gets: AtomicU64,
    sets: AtomicU64,
    refreshes: AtomicU64,
    removes: AtomicU64,
}

impl InMemoryDistributedStore {
    /// Create an empty, available store
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            removes: AtomicU64::new(0),
        }
    }

    /// Simulate the backing service going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether the store currently accepts calls
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.store
            .read()
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count()
    }

    /// Whether the store holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current expiry of a key, without sliding it
    ///
    /// Outer `None` means the key is absent or expired.
    pub fn expiry_of(&self, key: &str) -> Option<Option<DateTime<Utc>>> {
        let now = Utc::now();
        self.store
            .read()
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.expires_at)
    }

    /// Raw stored value, without sliding it
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        let now = Utc::now();
        self.store
            .read()
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.data.clone())
    }

    /// Calls served so far
    pub fn operation_counts(&self) -> StoreOperationCounts {
        StoreOperationCounts {
            gets: self.gets.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::StoreUnavailable {
                store: self.name().to_string(),
            })
        }
    }
}

impl Default for InMemoryDistributedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedStore for InMemoryDistributedStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.get_entry(key).await?.map(|blob| blob.data))
    }

    async fn get_entry(&self, key: &str) -> Result<Option<StoredBlob>> {
        self.check_available()?;
        self.gets.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        let mut store = self.store.write();
        if store.get(key).is_some_and(|e| e.is_expired_at(now)) {
            store.remove(key);
            return Ok(None);
        }
        Ok(store.get_mut(key).map(|entry| {
            entry.slide(now);
            StoredBlob {
                data: entry.data.clone(),
                expires_at: entry.expires_at,
            }
        }))
    }

    async fn set(&self, key: &str, value: Bytes, options: DistributedEntryOptions) -> Result<()> {
        self.check_available()?;
        self.sets.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        let entry = StoredEntry {
            data: value,
            deadline: options.absolute_deadline(now),
            sliding: options.sliding_expiration,
            expires_at: options.effective_expiry(now),
        };

        let mut store = self.store.write();
        if entry.is_expired_at(now) {
            store.remove(key);
        } else {
            store.insert(key.to_string(), entry);
        }
        Ok(())
    }

    async fn refresh(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        let mut store = self.store.write();
        if store.get(key).is_some_and(|e| e.is_expired_at(now)) {
            store.remove(key);
        } else if let Some(entry) = store.get_mut(key) {
            entry.slide(now);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.removes.fetch_add(1, Ordering::Relaxed);

        self.store.write().remove(key);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_basic_operations() {
        let store = InMemoryDistributedStore::new();
        let options = DistributedEntryOptions::default();

        store
            .set("user1", Bytes::from_static(b"blob"), options)
            .await
            .unwrap();
        assert_eq!(
            store.get("user1").await.unwrap(),
            Some(Bytes::from_static(b"blob"))
        );
        assert_eq!(store.len(), 1);

        store.remove("user1").await.unwrap();
        assert!(store.get("user1").await.unwrap().is_none());
        // Removing again is a no-op
        store.remove("user1").await.unwrap();

        let counts = store.operation_counts();
        assert_eq!(counts.sets, 1);
        assert_eq!(counts.gets, 2);
        assert_eq!(counts.removes, 2);
    }

    #[tokio::test]
    async fn test_get_entry_reports_expiry() {
        let store = InMemoryDistributedStore::new();
        let options = DistributedEntryOptions {
            absolute_expiration_relative_to_now: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        store
            .set("user1", Bytes::from_static(b"blob"), options)
            .await
            .unwrap();

        let blob = store.get_entry("user1").await.unwrap().unwrap();
        assert_eq!(blob.data, Bytes::from_static(b"blob"));
        assert_eq!(Some(blob.expires_at), store.expiry_of("user1"));
        assert!(blob.expires_at.unwrap() <= Utc::now() + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = InMemoryDistributedStore::new();
        store.set_available(false);

        assert_matches!(
            store.get("user1").await,
            Err(Error::StoreUnavailable { .. })
        );
        assert_matches!(
            store
                .set("user1", Bytes::new(), DistributedEntryOptions::default())
                .await,
            Err(Error::StoreUnavailable { .. })
        );

        store.set_available(true);
        assert!(store.get("user1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relative_expiration() {
        let store = InMemoryDistributedStore::new();
        let options = DistributedEntryOptions {
            absolute_expiration_relative_to_now: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        store
            .set("user1", Bytes::from_static(b"blob"), options)
            .await
            .unwrap();
        assert!(store.get("user1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.get("user1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sliding_expiration_capped_by_deadline() {
        let store = InMemoryDistributedStore::new();
        let options = DistributedEntryOptions {
            absolute_expiration_relative_to_now: Some(Duration::from_secs(60)),
            sliding_expiration: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        let before = Utc::now();
        store
            .set("user1", Bytes::from_static(b"blob"), options)
            .await
            .unwrap();
        store.refresh("user1").await.unwrap();

        let expiry = store.expiry_of("user1").unwrap().unwrap();
        assert!(expiry <= Utc::now() + chrono::Duration::seconds(60));
        assert!(expiry >= before + chrono::Duration::seconds(59));
    }

    #[tokio::test]
    async fn test_sliding_window_extended_by_refresh() {
        let store = InMemoryDistributedStore::new();
        let options = DistributedEntryOptions {
            sliding_expiration: Some(Duration::from_millis(250)),
            ..Default::default()
        };
        store
            .set("user1", Bytes::from_static(b"blob"), options)
            .await
            .unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            store.refresh("user1").await.unwrap();
        }
        // 400ms since the write, still alive thanks to the refreshes
        assert!(store.peek("user1").is_some());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(store.peek("user1").is_none());
        assert_eq!(store.operation_counts().refreshes, 4);
    }

    #[tokio::test]
    async fn test_already_expired_write_removes_key() {
        let store = InMemoryDistributedStore::new();
        store
            .set("user1", Bytes::from_static(b"old"), DistributedEntryOptions::default())
            .await
            .unwrap();

        let options = DistributedEntryOptions {
            absolute_expiration: Some(Utc::now() - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        store
            .set("user1", Bytes::from_static(b"new"), options)
            .await
            .unwrap();
        assert!(store.get("user1").await.unwrap().is_none());
    }
}
