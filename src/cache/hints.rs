//! Serializer Hints
//!
//! Per-operation context passed alongside a cache read, write or remove.

use crate::cache::tier::CacheLevel;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Telemetry Slot
// =============================================================================

/// Shared slot recording which cache level satisfied a read
#[derive(Debug, Default)]
pub struct CacheTelemetry {
    cache_level: AtomicU8,
}

impl CacheTelemetry {
    /// Create an empty telemetry slot
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record the level that served the read
    pub fn set_cache_level(&self, level: CacheLevel) {
        self.cache_level.store(level.as_u8(), Ordering::Release);
    }

    /// Level that served the last read (None if nothing was found)
    pub fn cache_level(&self) -> CacheLevel {
        CacheLevel::from_u8(self.cache_level.load(Ordering::Acquire))
    }
}

// =============================================================================
// Serializer Hints
// =============================================================================

/// Hints for a single cache operation
#[derive(Debug, Clone, Default)]
pub struct SerializerHints {
    /// Cancellation signal, honored by every distributed store call
    pub cancellation: CancellationToken,
    /// Suggested absolute expiry for this write
    pub suggested_cache_expiry: Option<DateTime<Utc>>,
    /// Telemetry slot filled in by reads
    pub telemetry: Option<Arc<CacheTelemetry>>,
}

impl SerializerHints {
    /// Create empty hints (never cancelled, no expiry, no telemetry)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cancellation token
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Set the suggested expiry
    pub fn with_suggested_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.suggested_cache_expiry = Some(expiry);
        self
    }

    /// Attach a telemetry slot
    pub fn with_telemetry(mut self, telemetry: Arc<CacheTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Record the level that served a read, if a slot is attached
    pub(crate) fn record_cache_level(&self, level: CacheLevel) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.set_cache_level(level);
        }
    }
}
