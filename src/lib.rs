//! Identity Token Cache - Persistent Token Cache Serialization
//!
//! Persists the serialized token caches of an authentication engine to a
//! two-level cache: a bounded in-process L1 in front of a distributed L2
//! (Redis, or any [`cache::DistributedStore`]).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                       Token Acquisition Engine                               │
//! │              (user token cache)          (app token cache)                  │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                    Notification Bridge (TokenCacheSerializer)               │
//! ├──────────────────────────────────────┬──────────────────────────────────────┤
//! │     DistributedTokenCacheAdapter     │     MemoryTokenCacheProvider         │
//! │  ┌──────────────┐  ┌──────────────┐  │  ┌────────────────────────────────┐  │
//! │  │  L1 Memory   │  │  L2 Store    │  │  │  MemoryStorage (single level)  │  │
//! │  │  (DashMap)   │  │  (Redis)     │  │  └────────────────────────────────┘  │
//! │  └──────────────┘  └──────────────┘  │                                      │
//! └──────────────────────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: Bridge, adapters, stores, encryption and settings
//! - [`registration`]: Entry points for the hosting application
//! - [`error`]: Error types and handling

pub mod cache;
pub mod error;
pub mod registration;

// Re-export commonly used types
pub use cache::{
    AesGcmProtector, CacheEvent, CacheLevel, CacheSettings, CacheStatsSnapshot, CacheTelemetry,
    DataProtector, DataProtectorRef, DeserializationError, DistributedCacheOptions,
    DistributedStore, DistributedStoreRef, DistributedTokenCacheAdapter, InMemoryDistributedStore,
    MemoryCacheOptions, MemoryTokenCacheProvider, SerializerHints, TokenCacheAccess,
    TokenCacheHost, TokenCacheNotifications, TokenCacheSerializer, TokenCacheStore,
};

#[cfg(feature = "redis")]
pub use cache::RedisDistributedStore;

pub use error::{Error, Result};

pub use registration::{
    add_distributed_token_cache, add_distributed_token_cache_from_settings,
    add_in_memory_token_cache,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
