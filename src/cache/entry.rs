//! Cache Entry Types
//!
//! Defines the L1 entry wrapper around an opaque token cache blob.

use bytes::Bytes;
use chrono::{DateTime, Utc};

// =============================================================================
// Cache Entry
// =============================================================================

/// A blob held in the in-process cache, with expiry and access metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The serialized token cache
    pub data: Bytes,
    /// Time when entry was created/cached
    pub created_at: DateTime<Utc>,
    /// Time when entry was last accessed
    pub last_accessed: DateTime<Utc>,
    /// Number of times this entry has been accessed
    pub access_count: u64,
    /// Absolute expiry (None = never expires)
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(data: Bytes, expires_at: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        Self {
            data,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            expires_at,
        }
    }

    /// Record an access to this entry
    pub fn record_access(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check if the entry has expired at the given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    /// Get the stored size in bytes (the L1 size unit)
    pub fn stored_size(&self) -> u64 {
        self.data.len() as u64
    }
}
