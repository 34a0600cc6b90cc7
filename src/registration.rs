//! Token Cache Registration
//!
//! Entry points a hosting application uses to wire a token cache store
//! behind the notification bridge. Options are validated here, so an
//! unusable configuration fails at startup rather than on first use.

use crate::cache::{
    CacheSettings, DataProtectorRef, DistributedCacheOptions, DistributedStoreRef,
    DistributedTokenCacheAdapter, MemoryCacheOptions, MemoryTokenCacheProvider,
    TokenCacheSerializer,
};
use crate::error::Result;

/// Register the two-level (L1 + distributed L2) token cache
pub fn add_distributed_token_cache(
    store: DistributedStoreRef,
    options: DistributedCacheOptions,
    protector: Option<DataProtectorRef>,
) -> Result<TokenCacheSerializer<DistributedTokenCacheAdapter>> {
    let adapter = DistributedTokenCacheAdapter::new(store, options, protector)?;
    Ok(TokenCacheSerializer::new(adapter))
}

/// Register the two-level token cache from loaded settings
///
/// The failure callback, if any, is attached to the options by `configure`.
pub fn add_distributed_token_cache_from_settings<F>(
    store: DistributedStoreRef,
    settings: CacheSettings,
    protector: Option<DataProtectorRef>,
    configure: F,
) -> Result<TokenCacheSerializer<DistributedTokenCacheAdapter>>
where
    F: FnOnce(DistributedCacheOptions) -> DistributedCacheOptions,
{
    add_distributed_token_cache(store, configure(settings.into_options()), protector)
}

/// Register the memory-only token cache
pub fn add_in_memory_token_cache(
    options: MemoryCacheOptions,
) -> Result<TokenCacheSerializer<MemoryTokenCacheProvider>> {
    Ok(TokenCacheSerializer::new(MemoryTokenCacheProvider::new(options)?))
}
