//! Cache Storage Backends
//!
//! The in-process L1 store and the distributed (L2) store port with its
//! implementations.

mod distributed_memory;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use distributed_memory::{InMemoryDistributedStore, StoreOperationCounts};
pub use memory::MemoryStorage;
#[cfg(feature = "redis")]
pub use self::redis::RedisDistributedStore;

use crate::cache::options::{add_duration, earliest};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Distributed Entry Options
// =============================================================================

/// Expiration settings for one distributed store write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributedEntryOptions {
    /// Fixed instant after which the entry is gone
    pub absolute_expiration: Option<DateTime<Utc>>,
    /// Lifetime measured from the write
    pub absolute_expiration_relative_to_now: Option<Duration>,
    /// Idle window, reset by every get/refresh
    pub sliding_expiration: Option<Duration>,
}

impl DistributedEntryOptions {
    /// Hard deadline for an entry written at `written_at`: the sliding window
    /// can never extend past it
    pub fn absolute_deadline(&self, written_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let relative = self
            .absolute_expiration_relative_to_now
            .and_then(|d| add_duration(written_at, d));
        earliest(self.absolute_expiration, relative)
    }

    /// Expiry of an entry written (or last touched) at `now`
    pub fn effective_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let sliding = self.sliding_expiration.and_then(|d| add_duration(now, d));
        earliest(self.absolute_deadline(now), sliding)
    }
}

// =============================================================================
// Stored Blob
// =============================================================================

/// A blob read from the distributed store, with its expiry after the read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Bytes,
    /// When the entry will expire unless touched again (None = unknown or never)
    pub expires_at: Option<DateTime<Utc>>,
}

// =============================================================================
// DistributedStore Trait (Port)
// =============================================================================

/// Port for the remote/shared (L2) key-value store
///
/// Implementations are expected to handle their own internal concurrency.
/// Missing keys are `Ok(None)`, never errors.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// Store name used in logs and errors
    fn name(&self) -> &str;

    /// Get the blob for a key, sliding its expiration
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Get the blob together with its expiry
    ///
    /// Stores that cannot report an expiry keep the default, which reports
    /// none.
    async fn get_entry(&self, key: &str) -> Result<Option<StoredBlob>> {
        Ok(self.get(key).await?.map(|data| StoredBlob {
            data,
            expires_at: None,
        }))
    }

    /// Store a blob, replacing any prior value
    async fn set(&self, key: &str, value: Bytes, options: DistributedEntryOptions) -> Result<()>;

    /// Reset the sliding expiration of a key without reading it
    async fn refresh(&self, key: &str) -> Result<()>;

    /// Delete a key; a no-op if absent
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Type alias for a shared distributed store
pub type DistributedStoreRef = Arc<dyn DistributedStore>;
