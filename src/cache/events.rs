//! Cache Events
//!
//! Events emitted by the token cache adapter for monitoring and observability.

use crate::cache::tier::CacheLevel;
use serde::{Deserialize, Serialize};

/// Distributed store operation, as reported in events and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L2Operation {
    Read,
    Write,
    Remove,
    Refresh,
}

impl std::fmt::Display for L2Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            L2Operation::Read => write!(f, "read"),
            L2Operation::Write => write!(f, "write"),
            L2Operation::Remove => write!(f, "remove"),
            L2Operation::Refresh => write!(f, "refresh"),
        }
    }
}

/// Events emitted by the token cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CacheEvent {
    /// Read satisfied by a cache level
    Hit { key: String, level: CacheLevel },

    /// Read found nothing in any level
    Miss { key: String },

    /// Blob written
    Write {
        key: String,
        size_bytes: u64,
        /// Whether the blob landed in L1
        l1_cached: bool,
        /// Whether the L2 write was left running in the background
        l2_background: bool,
    },

    /// Blob removed from all levels
    Remove { key: String },

    /// L2 hit copied into L1
    BackPropagate {
        key: String,
        size_bytes: u64,
        l1_entries: u64,
        l1_size_bytes: u64,
    },

    /// L1 entries dropped to make room for a new one
    L1Evicted { key: String, evicted: u64 },

    /// L2 operation failed and is being retried once
    L2Retry {
        key: String,
        operation: L2Operation,
        error: String,
    },

    /// L2 operation failed for good
    L2Failure {
        key: String,
        operation: L2Operation,
        error: String,
        /// Failure happened in a spawned task and could not propagate
        background: bool,
    },
}

impl CacheEvent {
    /// Create a Hit event
    pub fn hit(key: &str, level: CacheLevel) -> Self {
        CacheEvent::Hit {
            key: key.to_string(),
            level,
        }
    }

    /// Create a Miss event
    pub fn miss(key: &str) -> Self {
        CacheEvent::Miss {
            key: key.to_string(),
        }
    }

    /// Create an L2Failure event
    pub fn l2_failure(
        key: &str,
        operation: L2Operation,
        error: &crate::error::Error,
        background: bool,
    ) -> Self {
        CacheEvent::L2Failure {
            key: key.to_string(),
            operation,
            error: error.to_string(),
            background,
        }
    }

    /// Get the key associated with this event
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key }
            | CacheEvent::Write { key, .. }
            | CacheEvent::Remove { key }
            | CacheEvent::BackPropagate { key, .. }
            | CacheEvent::L1Evicted { key, .. }
            | CacheEvent::L2Retry { key, .. }
            | CacheEvent::L2Failure { key, .. } => key,
        }
    }

    /// Get the cache level associated with this event (if any)
    pub fn level(&self) -> Option<CacheLevel> {
        match self {
            CacheEvent::Hit { level, .. } => Some(*level),
            CacheEvent::BackPropagate { .. } | CacheEvent::L1Evicted { .. } => {
                Some(CacheLevel::L1Cache)
            }
            CacheEvent::L2Retry { .. } | CacheEvent::L2Failure { .. } => Some(CacheLevel::L2Cache),
            _ => None,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(self, CacheEvent::L2Failure { .. })
    }
}
