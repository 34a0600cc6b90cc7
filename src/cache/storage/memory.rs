//! L1 In-Memory Storage
//!
//! Bounded in-process cache using DashMap for concurrent access. Size is
//! accounted in blob bytes; inserts that would overflow the capacity compact
//! the map first (expired entries, then least recently accessed).

use crate::cache::entry::CacheEntry;
use crate::cache::tier::L1_DEFAULT_SIZE_LIMIT_BYTES;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

// =============================================================================
// Memory Storage
// =============================================================================

/// L1 in-memory blob storage backed by DashMap
pub struct MemoryStorage {
    /// The actual storage map
    entries: DashMap<String, CacheEntry>,
    /// Current total size in bytes
    size_bytes: AtomicU64,
    /// Current entry count
    entry_count: AtomicU64,
    /// Entries dropped to make room
    evictions: AtomicU64,
    /// Maximum capacity
    capacity_bytes: u64,
}

impl MemoryStorage {
    /// Create new memory storage with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(L1_DEFAULT_SIZE_LIMIT_BYTES)
    }

    /// Create new memory storage with specified capacity
    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            entries: DashMap::new(),
            size_bytes: AtomicU64::new(0),
            entry_count: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            capacity_bytes,
        }
    }

    /// Get current capacity
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Get available space
    pub fn available_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.size_bytes())
    }

    /// Get current storage size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Get current entry count
    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Get the number of entries evicted for capacity
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get the blob for a key, recording the access
    ///
    /// Expired entries are removed and reported as missing.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        {
            let mut entry = self.entries.get_mut(key)?;
            if !entry.is_expired() {
                entry.record_access();
                return Some(entry.data.clone());
            }
        }

        // A concurrent set may have replaced the entry since the guard dropped
        self.remove_where(key, |e| e.is_expired());
        None
    }

    /// Peek at an entry without recording an access
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    /// Check if a live entry exists for a key
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Store a blob with an optional absolute expiry
    ///
    /// Returns false when the blob was not cached: it is already expired or
    /// larger than the whole capacity. Any previous value for the key is
    /// dropped in that case, so L1 never serves a blob older than the last
    /// write.
    pub fn set(&self, key: &str, data: Bytes, expires_at: Option<DateTime<Utc>>) -> bool {
        let entry = CacheEntry::new(data, expires_at);

        if entry.is_expired_at(entry.created_at) {
            debug!(key = %key, "Skipping L1 insert: entry already expired");
            self.remove(key);
            return false;
        }

        let new_size = entry.stored_size();
        if new_size > self.capacity_bytes {
            debug!(
                key = %key,
                size = new_size,
                capacity = self.capacity_bytes,
                "Skipping L1 insert: entry larger than capacity"
            );
            self.remove(key);
            return false;
        }

        let old_size = self.entries.get(key).map(|e| e.stored_size()).unwrap_or(0);
        let projected = self.size_bytes().saturating_add(new_size).saturating_sub(old_size);
        if projected > self.capacity_bytes {
            self.compact(projected - self.capacity_bytes, key);
        }

        self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
        match self.entries.insert(key.to_string(), entry) {
            Some(old) => {
                self.size_bytes.fetch_sub(old.stored_size(), Ordering::Relaxed);
            }
            None => {
                self.entry_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        true
    }

    /// Delete an entry by key
    ///
    /// Returns the deleted entry if it existed.
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        let (_, entry) = self.entries.remove(key)?;
        self.release(&entry);
        Some(entry)
    }

    /// Delete an entry only if it still matches `predicate`
    fn remove_where<F>(&self, key: &str, predicate: F) -> Option<CacheEntry>
    where
        F: FnOnce(&CacheEntry) -> bool,
    {
        let (_, entry) = self.entries.remove_if(key, |_, e| predicate(e))?;
        self.release(&entry);
        Some(entry)
    }

    fn release(&self, entry: &CacheEntry) {
        self.entry_count.fetch_sub(1, Ordering::Relaxed);
        self.size_bytes.fetch_sub(entry.stored_size(), Ordering::Relaxed);
    }

    /// Free at least `bytes_to_free` bytes, never evicting `keep`
    ///
    /// Expired entries go first, then entries in least-recently-accessed
    /// order. Returns the number of bytes freed.
    pub fn compact(&self, bytes_to_free: u64, keep: &str) -> u64 {
        let now = Utc::now();
        let mut freed = 0u64;

        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|r| r.value().is_expired_at(now))
            .map(|r| r.key().clone())
            .collect();
        for key in expired {
            if let Some(entry) = self.remove_where(&key, |e| e.is_expired_at(now)) {
                freed += entry.stored_size();
            }
        }

        if freed < bytes_to_free {
            let mut candidates: Vec<(String, DateTime<Utc>)> = self
                .entries
                .iter()
                .filter(|r| r.key() != keep)
                .map(|r| (r.key().clone(), r.value().last_accessed))
                .collect();
            candidates.sort_by_key(|(_, last_accessed)| *last_accessed);

            for (key, last_accessed) in candidates {
                if freed >= bytes_to_free {
                    break;
                }
                // Skip entries rewritten or read since the snapshot
                if let Some(entry) = self.remove_where(&key, |e| e.last_accessed == last_accessed) {
                    freed += entry.stored_size();
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        debug!(freed = freed, requested = bytes_to_free, "Compacted L1 cache");
        freed
    }

    /// Get all keys currently held
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.retain(|_, entry| {
            self.release(entry);
            false
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_basic_operations() {
        let storage = MemoryStorage::new();

        assert!(storage.set("user1", Bytes::from_static(b"hello world"), None));
        assert_eq!(storage.entry_count(), 1);
        assert_eq!(storage.size_bytes(), 11);

        assert_eq!(storage.get("user1"), Some(Bytes::from_static(b"hello world")));
        assert!(storage.contains("user1"));
        assert!(!storage.contains("nonexistent"));

        let deleted = storage.remove("user1").unwrap();
        assert_eq!(deleted.data, Bytes::from_static(b"hello world"));
        assert_eq!(storage.entry_count(), 0);
        assert_eq!(storage.size_bytes(), 0);
        assert!(storage.remove("user1").is_none());
    }

    #[test]
    fn test_update_existing() {
        let storage = MemoryStorage::new();

        storage.set("user1", Bytes::from_static(b"short"), None);
        assert_eq!(storage.size_bytes(), 5);

        storage.set("user1", Bytes::from_static(b"much longer data here"), None);
        assert_eq!(storage.size_bytes(), 21);
        assert_eq!(storage.entry_count(), 1); // Still 1 entry
    }

    #[test]
    fn test_expired_entry_dropped_on_read() {
        let storage = MemoryStorage::new();
        storage.set(
            "user1",
            Bytes::from_static(b"data"),
            Some(Utc::now() + Duration::milliseconds(20)),
        );
        assert!(storage.get("user1").is_some());

        std::thread::sleep(std::time::Duration::from_millis(40));
        assert!(storage.get("user1").is_none());
        assert_eq!(storage.entry_count(), 0);
        assert_eq!(storage.size_bytes(), 0);
    }

    #[test]
    fn test_already_expired_not_cached() {
        let storage = MemoryStorage::new();
        storage.set("user1", Bytes::from_static(b"old"), None);

        let cached = storage.set(
            "user1",
            Bytes::from_static(b"new"),
            Some(Utc::now() - Duration::hours(1)),
        );
        assert!(!cached);
        // Stale value must not survive a newer write
        assert!(storage.get("user1").is_none());
        assert_eq!(storage.entry_count(), 0);
    }

    #[test]
    fn test_oversized_entry_not_cached() {
        let storage = MemoryStorage::with_capacity(4);
        assert!(!storage.set("user1", Bytes::from_static(b"too large"), None));
        assert_eq!(storage.entry_count(), 0);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let storage = MemoryStorage::with_capacity(10);

        storage.set("a", Bytes::from_static(b"aaaa"), None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        storage.set("b", Bytes::from_static(b"bbbb"), None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        // Touch "a" so "b" becomes the eviction candidate
        assert!(storage.get("a").is_some());

        assert!(storage.set("c", Bytes::from_static(b"cccc"), None));
        assert!(storage.contains("a"));
        assert!(!storage.contains("b"));
        assert!(storage.contains("c"));
        assert_eq!(storage.size_bytes(), 8);
        assert_eq!(storage.eviction_count(), 1);
        assert!(storage.available_bytes() >= 2);
    }

    #[test]
    fn test_compact_prefers_expired() {
        let storage = MemoryStorage::with_capacity(100);
        storage.set(
            "stale",
            Bytes::from_static(b"0123456789"),
            Some(Utc::now() + Duration::milliseconds(10)),
        );
        storage.set("fresh", Bytes::from_static(b"0123456789"), None);
        std::thread::sleep(std::time::Duration::from_millis(20));

        let freed = storage.compact(5, "");
        assert_eq!(freed, 10);
        assert!(storage.contains("fresh"));
        assert_eq!(storage.eviction_count(), 0);
    }

    #[test]
    fn test_expired_read_keeps_concurrent_rewrite() {
        let storage = MemoryStorage::new();
        storage.set(
            "user1",
            Bytes::from_static(b"old"),
            Some(Utc::now() + Duration::milliseconds(10)),
        );
        std::thread::sleep(std::time::Duration::from_millis(20));

        // A reader sees the expired entry, then a writer replaces it
        assert!(!storage.contains("user1"));
        storage.set("user1", Bytes::from_static(b"new"), None);
        assert!(storage.remove_where("user1", |e| e.is_expired()).is_none());
        assert_eq!(storage.get("user1"), Some(Bytes::from_static(b"new")));
        assert_eq!(storage.entry_count(), 1);
        assert_eq!(storage.size_bytes(), 3);
    }

    #[test]
    fn test_concurrent_get_and_set_keep_latest() {
        let storage = std::sync::Arc::new(MemoryStorage::new());
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        if t % 2 == 0 {
                            let expiry = Utc::now() + Duration::microseconds((i % 3) as i64);
                            storage.set("user1", Bytes::from(vec![t; 4]), Some(expiry));
                        } else {
                            let _ = storage.get("user1");
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        storage.set("user1", Bytes::from_static(b"last"), None);
        assert_eq!(storage.get("user1"), Some(Bytes::from_static(b"last")));
        assert_eq!(storage.entry_count(), 1);
        assert_eq!(storage.size_bytes(), 4);
    }

    #[test]
    fn test_clear() {
        let storage = MemoryStorage::new();

        storage.set("k1", Bytes::from_static(b"data1"), None);
        storage.set("k2", Bytes::from_static(b"data2"), None);
        storage.set("k3", Bytes::from_static(b"data3"), None);
        assert_eq!(storage.entry_count(), 3);
        assert_eq!(storage.keys().len(), 3);

        storage.clear();

        assert_eq!(storage.entry_count(), 0);
        assert_eq!(storage.size_bytes(), 0);
    }
}
