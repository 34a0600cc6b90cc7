//! Cache Level Definitions
//!
//! Defines the two-level hierarchy a token cache read can be served from.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Size Thresholds
// =============================================================================

/// Default L1 size limit: 500 MB of blob bytes
pub const L1_DEFAULT_SIZE_LIMIT_BYTES: u64 = 500 * 1024 * 1024;

// =============================================================================
// Cache Level
// =============================================================================

/// Cache level that satisfied a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    /// Not found in any level (or not recorded yet)
    #[default]
    None,
    /// L1: In-process memory cache
    L1Cache,
    /// L2: Distributed cache
    L2Cache,
}

impl CacheLevel {
    /// Encode as a byte for atomic storage
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            CacheLevel::None => 0,
            CacheLevel::L1Cache => 1,
            CacheLevel::L2Cache => 2,
        }
    }

    /// Decode from a byte produced by [`CacheLevel::as_u8`]
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CacheLevel::L1Cache,
            2 => CacheLevel::L2Cache,
            _ => CacheLevel::None,
        }
    }

    /// Check if this level represents a hit
    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheLevel::None)
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheLevel::None => write!(f, "None"),
            CacheLevel::L1Cache => write!(f, "L1-Memory"),
            CacheLevel::L2Cache => write!(f, "L2-Distributed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_byte_encoding() {
        for level in [CacheLevel::None, CacheLevel::L1Cache, CacheLevel::L2Cache] {
            assert_eq!(CacheLevel::from_u8(level.as_u8()), level);
        }
        assert_eq!(CacheLevel::from_u8(42), CacheLevel::None);
    }

    #[test]
    fn test_level_hit() {
        assert!(!CacheLevel::None.is_hit());
        assert!(CacheLevel::L1Cache.is_hit());
        assert!(CacheLevel::L2Cache.is_hit());
        assert_eq!(CacheLevel::default(), CacheLevel::None);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(CacheLevel::L1Cache.to_string(), "L1-Memory");
        assert_eq!(CacheLevel::L2Cache.to_string(), "L2-Distributed");
    }
}
