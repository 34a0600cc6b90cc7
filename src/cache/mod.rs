//! Token Cache Persistence
//!
//! Persists the serialized token caches of an authentication engine outside
//! the engine's process, so tokens survive restarts and are shared between
//! instances of a web application.
//!
//! - **Bridge**: turns the engine's before/after-access notifications into
//!   read/write/remove calls on a [`TokenCacheStore`]
//! - **L1**: bounded in-process cache of blobs (DashMap, size-based eviction)
//! - **L2**: distributed store of blobs (Redis, or the in-memory test store)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Token Acquisition Engine                              │
//! │        before-access │ after-access │ before-write                      │
//! ├──────────────────────┴──────────────┴───────────────────────────────────┤
//! │                    TokenCacheSerializer (bridge)                         │
//! │     full replace on read  •  write-or-remove  •  keyed write lock       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                    DistributedTokenCacheAdapter                          │
//! │  ┌──────────────────────┐            ┌──────────────────────────────┐   │
//! │  │  L1 MemoryStorage    │  back-     │  L2 DistributedStore         │   │
//! │  │  (plaintext, ratio-  │◄──propag.──│  (optionally encrypted,      │   │
//! │  │   scaled expiry)     │            │   retry-once, async writes)  │   │
//! │  └──────────────────────┘            └──────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use identity_token_cache::cache::{DistributedCacheOptions, InMemoryDistributedStore};
//! use identity_token_cache::registration::add_distributed_token_cache;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let options = DistributedCacheOptions {
//!     l1_expiration_ratio: 0.5,
//!     sliding_expiration: Some(Duration::from_secs(3600)),
//!     enable_async_l2_write: true,
//!     ..Default::default()
//! }
//! .on_l2_failure(|e| {
//!     tracing::warn!(error = %e, "reconnecting to L2");
//!     true
//! });
//!
//! let serializer = Arc::new(add_distributed_token_cache(
//!     Arc::new(InMemoryDistributedStore::new()),
//!     options,
//!     None,
//! )?);
//! serializer.initialize(&mut engine);
//! ```

pub mod adapter;
pub mod bridge;
pub mod entry;
pub mod events;
pub mod hints;
pub mod memory_provider;
pub mod metrics;
pub mod options;
pub mod protection;
pub mod settings;
pub mod storage;
pub mod tier;

// Re-export main types
pub use adapter::{DistributedTokenCacheAdapter, DistributedTokenCacheAdapterBuilder};
pub use bridge::{
    DeserializationError, TokenCacheAccess, TokenCacheHost, TokenCacheNotifications,
    TokenCacheSerializer, WriteGuard,
};
pub use entry::CacheEntry;
pub use events::{CacheEvent, L2Operation};
pub use hints::{CacheTelemetry, SerializerHints};
pub use memory_provider::MemoryTokenCacheProvider;
pub use metrics::{CacheStatsSnapshot, LevelMetrics, LevelMetricsSnapshot, TokenCacheMetrics};
pub use options::{
    DistributedCacheOptions, L2FailureCallback, MemoryCacheOptions, DEFAULT_MEMORY_CACHE_EXPIRATION,
};
pub use protection::{AesGcmProtector, DataProtector, DataProtectorRef};
pub use settings::{CacheSettings, MemoryCacheSettings};
pub use storage::{
    DistributedEntryOptions, DistributedStore, DistributedStoreRef, InMemoryDistributedStore,
    MemoryStorage, StoredBlob,
};
#[cfg(feature = "redis")]
pub use storage::RedisDistributedStore;
pub use tier::{CacheLevel, L1_DEFAULT_SIZE_LIMIT_BYTES};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

// =============================================================================
// TokenCacheStore Trait (Port)
// =============================================================================

/// Storage contract the bridge persists token caches through
///
/// A missing key is never an error: reads return `Ok(None)` and removes of
/// unknown keys succeed.
#[async_trait]
pub trait TokenCacheStore: Send + Sync {
    /// Read the blob stored under a key
    async fn read_bytes(&self, key: &str, hints: &SerializerHints) -> Result<Option<Bytes>>;

    /// Store a blob under a key, replacing any previous one
    async fn write_bytes(&self, key: &str, bytes: Bytes, hints: &SerializerHints) -> Result<()>;

    /// Remove the blob stored under a key
    async fn remove_key(&self, key: &str, hints: &SerializerHints) -> Result<()>;

    /// Whether blobs are encrypted at rest (reported in deserialization logs)
    fn is_encrypted(&self) -> bool {
        false
    }
}

/// Type alias for Arc'd TokenCacheStore
pub type TokenCacheStoreRef = Arc<dyn TokenCacheStore>;

#[async_trait]
impl<T: TokenCacheStore + ?Sized> TokenCacheStore for Arc<T> {
    async fn read_bytes(&self, key: &str, hints: &SerializerHints) -> Result<Option<Bytes>> {
        (**self).read_bytes(key, hints).await
    }

    async fn write_bytes(&self, key: &str, bytes: Bytes, hints: &SerializerHints) -> Result<()> {
        (**self).write_bytes(key, bytes, hints).await
    }

    async fn remove_key(&self, key: &str, hints: &SerializerHints) -> Result<()> {
        (**self).remove_key(key, hints).await
    }

    fn is_encrypted(&self) -> bool {
        (**self).is_encrypted()
    }
}

// =============================================================================
// Tests
// =============================================================================
