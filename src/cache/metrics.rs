//! Cache Metrics
//!
//! Cache-line aligned counters for the two cache levels, updated on the hot
//! read/write paths without locking.

use crate::cache::tier::CacheLevel;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Cache Line Size
// =============================================================================

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Per-Level Metrics (Cache-Line Aligned)
// =============================================================================

/// Metrics for a single cache level, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct LevelMetrics {
    /// Reads served by this level
    pub hits: AtomicU64,
    /// Reads this level could not serve
    pub misses: AtomicU64,
    /// Blobs stored
    pub writes: AtomicU64,
    /// Keys removed
    pub removes: AtomicU64,
    /// Failed operations (L2) or skipped inserts (L1)
    pub errors: AtomicU64,
    /// Operations retried after a failure
    pub retries: AtomicU64,
    /// Entries evicted for capacity
    pub evictions: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
}

// Verify size at compile time
const _: () = assert!(std::mem::size_of::<LevelMetrics>() <= CACHE_LINE_SIZE);

impl Default for LevelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    /// Update last update timestamp
    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        self.snapshot().hit_ratio()
    }

    /// Create a snapshot of current metrics
    pub fn snapshot(&self) -> LevelMetricsSnapshot {
        LevelMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Level Metrics Snapshot
// =============================================================================

/// Point-in-time snapshot of level metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub removes: u64,
    pub errors: u64,
    pub retries: u64,
    pub evictions: u64,
}

impl LevelMetricsSnapshot {
    /// Calculate hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Aggregate Cache Statistics
// =============================================================================

/// Aggregate statistics across both levels
#[derive(Debug, Clone, Default)]
pub struct CacheStatsSnapshot {
    pub l1: LevelMetricsSnapshot,
    pub l2: LevelMetricsSnapshot,
    /// Reads served by any level
    pub total_hits: u64,
    /// Reads that found nothing (every L1 miss falls through to L2)
    pub total_misses: u64,
    /// L2 hits copied into L1
    pub back_propagations: u64,
    /// L2 writes left running in the background
    pub background_writes: u64,
    /// Blobs currently held in L1
    pub l1_entries: u64,
    /// Bytes currently held in L1
    pub l1_size_bytes: u64,
}

impl CacheStatsSnapshot {
    /// Get overall hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total_hits + self.total_misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits as f64 / total as f64
        }
    }

    /// Get statistics for one level
    pub fn level(&self, level: CacheLevel) -> Option<&LevelMetricsSnapshot> {
        match level {
            CacheLevel::L1Cache => Some(&self.l1),
            CacheLevel::L2Cache => Some(&self.l2),
            CacheLevel::None => None,
        }
    }
}

// =============================================================================
// Token Cache Metrics
// =============================================================================

/// Metrics container owned by one adapter
#[derive(Debug, Default)]
pub struct TokenCacheMetrics {
    pub l1: LevelMetrics,
    pub l2: LevelMetrics,
    pub back_propagations: AtomicU64,
    pub background_writes: AtomicU64,
}

impl TokenCacheMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Get metrics for a specific level
    pub fn level(&self, level: CacheLevel) -> Option<&LevelMetrics> {
        match level {
            CacheLevel::L1Cache => Some(&self.l1),
            CacheLevel::L2Cache => Some(&self.l2),
            CacheLevel::None => None,
        }
    }

    pub fn record_back_propagation(&self) {
        self.back_propagations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_write(&self) {
        self.background_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Create a snapshot, with the current L1 occupancy supplied by the caller
    pub fn snapshot(&self, l1_entries: u64, l1_size_bytes: u64) -> CacheStatsSnapshot {
        let l1 = self.l1.snapshot();
        let l2 = self.l2.snapshot();
        CacheStatsSnapshot {
            l1,
            l2,
            total_hits: l1.hits + l2.hits,
            total_misses: l2.misses,
            back_propagations: self.back_propagations.load(Ordering::Relaxed),
            background_writes: self.background_writes.load(Ordering::Relaxed),
            l1_entries,
            l1_size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<LevelMetrics>(), CACHE_LINE_SIZE);
        assert_eq!(std::mem::size_of::<LevelMetrics>(), CACHE_LINE_SIZE);
    }

    #[test]
    fn test_level_metrics_operations() {
        let metrics = LevelMetrics::new();

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_write();
        metrics.record_retry();
        metrics.record_error();
        metrics.record_evictions(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.writes, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.evictions, 3);
        assert!((metrics.hit_ratio() - 0.666).abs() < 0.01);
        assert!(metrics.last_update_ms.load(Ordering::Acquire) > 0);
    }

    #[test]
    fn test_cache_stats_snapshot() {
        let metrics = TokenCacheMetrics::new();

        // L1 hit
        metrics.l1.record_hit();
        // L1 miss, L2 hit, back-propagated
        metrics.l1.record_miss();
        metrics.l2.record_hit();
        metrics.record_back_propagation();
        // Miss everywhere
        metrics.l1.record_miss();
        metrics.l2.record_miss();

        let stats = metrics.snapshot(1, 16);
        assert_eq!(stats.total_hits, 2);
        assert_eq!(stats.total_misses, 1);
        assert_eq!(stats.back_propagations, 1);
        assert_eq!(stats.l1_entries, 1);
        assert!((stats.hit_ratio() - 0.666).abs() < 0.01);
        assert_eq!(stats.level(CacheLevel::L2Cache).unwrap().hits, 1);
        assert!(stats.level(CacheLevel::None).is_none());
    }
}
