//! Memory Token Cache Provider
//!
//! Single-level token cache store over the bounded in-process cache. Suited
//! to single-instance applications and tests; nothing survives a restart.

use crate::cache::hints::SerializerHints;
use crate::cache::options::{add_duration, MemoryCacheOptions};
use crate::cache::storage::MemoryStorage;
use crate::cache::tier::CacheLevel;
use crate::cache::TokenCacheStore;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Lifetime used when the suggested expiry is already in the past
const MIN_ENTRY_LIFETIME: Duration = Duration::from_millis(1);

/// In-memory token cache store
#[derive(Clone)]
pub struct MemoryTokenCacheProvider {
    storage: Arc<MemoryStorage>,
    options: MemoryCacheOptions,
}

impl std::fmt::Debug for MemoryTokenCacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTokenCacheProvider")
            .field("entries", &self.storage.entry_count())
            .field("size_bytes", &self.storage.size_bytes())
            .field("options", &self.options)
            .finish()
    }
}

impl MemoryTokenCacheProvider {
    /// Create a provider, failing fast on invalid options
    pub fn new(options: MemoryCacheOptions) -> Result<Self> {
        options.validate()?;

        info!(
            size_limit = options.size_limit,
            expiration_secs = options.absolute_expiration_relative_to_now.as_secs(),
            "Memory token cache provider initialized"
        );

        Ok(Self {
            storage: Arc::new(MemoryStorage::with_capacity(options.size_limit)),
            options,
        })
    }

    /// Get the underlying storage
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// Get the provider options
    pub fn options(&self) -> &MemoryCacheOptions {
        &self.options
    }

    /// Entry lifetime for a write at `now`: the shorter of the suggested
    /// remaining lifetime and the configured one
    pub fn entry_lifetime(&self, suggested: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let configured = self.options.absolute_expiration_relative_to_now;

        let Some(suggested) = suggested else {
            return configured;
        };

        let remaining = (suggested - now).to_std().unwrap_or(MIN_ENTRY_LIFETIME);
        let remaining = remaining.max(MIN_ENTRY_LIFETIME);
        remaining.min(configured)
    }
}

#[async_trait]
impl TokenCacheStore for MemoryTokenCacheProvider {
    async fn read_bytes(&self, key: &str, hints: &SerializerHints) -> Result<Option<Bytes>> {
        let data = self.storage.get(key);
        if data.is_some() {
            hints.record_cache_level(CacheLevel::L1Cache);
        }
        Ok(data)
    }

    async fn write_bytes(&self, key: &str, bytes: Bytes, hints: &SerializerHints) -> Result<()> {
        let now = Utc::now();
        let lifetime = self.entry_lifetime(hints.suggested_cache_expiry, now);
        let expiry = add_duration(now, lifetime);

        let cached = self.storage.set(key, bytes, expiry);
        debug!(key = %key, lifetime_ms = lifetime.as_millis() as u64, cached, "Token cache written (memory)");
        Ok(())
    }

    async fn remove_key(&self, key: &str, _hints: &SerializerHints) -> Result<()> {
        self.storage.remove(key);
        debug!(key = %key, "Token cache removed (memory)");
        Ok(())
    }
}
