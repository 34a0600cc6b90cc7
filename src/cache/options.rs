//! Token Cache Options
//!
//! Declarative configuration for the two-level distributed adapter and the
//! memory-only provider. Options are validated once, when the adapter is
//! built, and are immutable afterwards.

use crate::cache::storage::DistributedEntryOptions;
use crate::cache::tier::L1_DEFAULT_SIZE_LIMIT_BYTES;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of a memory-only token cache entry: 14 days
pub const DEFAULT_MEMORY_CACHE_EXPIRATION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Callback deciding whether a failed L2 operation is retried once.
///
/// The application usually uses this hook to force a reconnect before
/// answering `true`.
pub type L2FailureCallback = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

// =============================================================================
// Distributed Cache Options
// =============================================================================

/// Configuration for [`DistributedTokenCacheAdapter`](crate::cache::DistributedTokenCacheAdapter)
#[derive(Clone)]
pub struct DistributedCacheOptions {
    /// L1 capacity in bytes of blob data
    pub l1_size_limit: u64,
    /// L1 lifetime as a fraction of the L2 lifetime, in (0, 1]
    pub l1_expiration_ratio: f64,
    /// Global absolute expiration for L2 entries
    pub absolute_expiration: Option<DateTime<Utc>>,
    /// L2 lifetime relative to the time of the write
    pub absolute_expiration_relative_to_now: Option<Duration>,
    /// L2 sliding window, reset on every access
    pub sliding_expiration: Option<Duration>,
    /// Skip the in-process cache entirely
    pub disable_l1_cache: bool,
    /// Encrypt blobs before handing them to L2
    pub encrypt: bool,
    /// Write to L2 in the background when L1 is enabled
    pub enable_async_l2_write: bool,
    /// Retry-once decision for failed L2 operations
    pub on_l2_cache_failure: Option<L2FailureCallback>,
}

impl Default for DistributedCacheOptions {
    fn default() -> Self {
        Self {
            l1_size_limit: L1_DEFAULT_SIZE_LIMIT_BYTES,
            l1_expiration_ratio: 1.0,
            absolute_expiration: None,
            absolute_expiration_relative_to_now: None,
            sliding_expiration: None,
            disable_l1_cache: false,
            encrypt: false,
            enable_async_l2_write: false,
            on_l2_cache_failure: None,
        }
    }
}

impl fmt::Debug for DistributedCacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedCacheOptions")
            .field("l1_size_limit", &self.l1_size_limit)
            .field("l1_expiration_ratio", &self.l1_expiration_ratio)
            .field("absolute_expiration", &self.absolute_expiration)
            .field(
                "absolute_expiration_relative_to_now",
                &self.absolute_expiration_relative_to_now,
            )
            .field("sliding_expiration", &self.sliding_expiration)
            .field("disable_l1_cache", &self.disable_l1_cache)
            .field("encrypt", &self.encrypt)
            .field("enable_async_l2_write", &self.enable_async_l2_write)
            .field("on_l2_cache_failure", &self.on_l2_cache_failure.is_some())
            .finish()
    }
}

impl DistributedCacheOptions {
    /// Set the L2 failure callback
    pub fn on_l2_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.on_l2_cache_failure = Some(Arc::new(callback));
        self
    }

    /// Whether any L2 expiration policy is configured
    pub fn has_expiration_policy(&self) -> bool {
        self.absolute_expiration.is_some()
            || self.absolute_expiration_relative_to_now.is_some()
            || self.sliding_expiration.is_some()
    }

    /// Validate the options, failing fast on anything unusable
    pub fn validate(&self) -> Result<()> {
        if self.has_expiration_policy() {
            let ratio = self.l1_expiration_ratio;
            if !ratio.is_finite() || ratio <= 0.0 || ratio > 1.0 {
                return Err(Error::Configuration(format!(
                    "l1_expiration_ratio must be greater than 0 and at most 1, got {}",
                    ratio
                )));
            }
        }

        if matches!(self.absolute_expiration_relative_to_now, Some(d) if d.is_zero()) {
            return Err(Error::Configuration(
                "absolute_expiration_relative_to_now must be positive".to_string(),
            ));
        }

        if matches!(self.sliding_expiration, Some(d) if d.is_zero()) {
            return Err(Error::Configuration(
                "sliding_expiration must be positive".to_string(),
            ));
        }

        if !self.disable_l1_cache && self.l1_size_limit == 0 {
            return Err(Error::Configuration(
                "l1_size_limit must be positive when the L1 cache is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// L1 lifetime measured from now: the ratio applied to the shorter of the
    /// relative and sliding L2 lifetimes
    ///
    /// A lifetime too large to represent after scaling is unbounded.
    pub fn l1_lifetime(&self) -> Option<Duration> {
        let relative = self
            .absolute_expiration_relative_to_now
            .and_then(|d| scale_duration(d, self.l1_expiration_ratio));
        let sliding = self
            .sliding_expiration
            .and_then(|d| scale_duration(d, self.l1_expiration_ratio));

        match (relative, sliding) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Effective absolute L2 expiry for a write: a suggested expiry may only
    /// shorten the configured global expiration, never extend it
    pub fn l2_absolute_expiration(
        &self,
        suggested: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        earliest(suggested, self.absolute_expiration)
    }

    /// L1 expiry for a blob written (or back-propagated) at `now`
    pub fn l1_expiry(
        &self,
        suggested: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let relative = self.l1_lifetime().and_then(|d| add_duration(now, d));
        earliest(self.l2_absolute_expiration(suggested), relative)
    }

    /// Entry options handed to the distributed store for a write
    pub fn l2_entry_options(&self, suggested: Option<DateTime<Utc>>) -> DistributedEntryOptions {
        DistributedEntryOptions {
            absolute_expiration: self.l2_absolute_expiration(suggested),
            absolute_expiration_relative_to_now: self.absolute_expiration_relative_to_now,
            sliding_expiration: self.sliding_expiration,
        }
    }
}

// =============================================================================
// Memory Cache Options
// =============================================================================

/// Configuration for [`MemoryTokenCacheProvider`](crate::cache::MemoryTokenCacheProvider)
#[derive(Debug, Clone)]
pub struct MemoryCacheOptions {
    /// Entry lifetime, unless the engine suggests a shorter one
    pub absolute_expiration_relative_to_now: Duration,
    /// Capacity in bytes of blob data
    pub size_limit: u64,
}

impl Default for MemoryCacheOptions {
    fn default() -> Self {
        Self {
            absolute_expiration_relative_to_now: DEFAULT_MEMORY_CACHE_EXPIRATION,
            size_limit: L1_DEFAULT_SIZE_LIMIT_BYTES,
        }
    }
}

impl MemoryCacheOptions {
    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        if self.absolute_expiration_relative_to_now.is_zero() {
            return Err(Error::Configuration(
                "absolute_expiration_relative_to_now must be positive".to_string(),
            ));
        }
        if self.size_limit == 0 {
            return Err(Error::Configuration("size_limit must be positive".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Time helpers
// =============================================================================

/// Earliest of two optional instants
pub(crate) fn earliest(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// `d * ratio`, or None when the product cannot be represented
pub(crate) fn scale_duration(d: Duration, ratio: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(d.as_secs_f64() * ratio).ok()
}

/// `now + d`, or None when the sum is out of range (treated as unbounded)
pub(crate) fn add_duration(now: DateTime<Utc>, d: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}
