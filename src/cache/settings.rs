//! Token Cache Settings
//!
//! File-friendly form of the cache options. Durations are whole seconds and
//! the absolute expiration is an RFC 3339 timestamp. The L2 failure callback
//! has no file representation and is attached in code after conversion.
//!
//! ```yaml
//! l1_size_limit: 104857600
//! l1_expiration_ratio: 0.5
//! absolute_expiration_relative_to_now_secs: 3600
//! sliding_expiration_secs: 900
//! encrypt: true
//! enable_async_l2_write: true
//! memory:
//!   absolute_expiration_relative_to_now_secs: 86400
//! ```

use crate::cache::options::{DistributedCacheOptions, MemoryCacheOptions};
use crate::cache::tier::L1_DEFAULT_SIZE_LIMIT_BYTES;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Settings for the two-level adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub l1_size_limit: u64,
    pub l1_expiration_ratio: f64,
    pub absolute_expiration: Option<DateTime<Utc>>,
    pub absolute_expiration_relative_to_now_secs: Option<u64>,
    pub sliding_expiration_secs: Option<u64>,
    pub disable_l1_cache: bool,
    pub encrypt: bool,
    pub enable_async_l2_write: bool,
    /// Settings for the memory-only provider
    pub memory: MemoryCacheSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            l1_size_limit: L1_DEFAULT_SIZE_LIMIT_BYTES,
            l1_expiration_ratio: 1.0,
            absolute_expiration: None,
            absolute_expiration_relative_to_now_secs: None,
            sliding_expiration_secs: None,
            disable_l1_cache: false,
            encrypt: false,
            enable_async_l2_write: false,
            memory: MemoryCacheSettings::default(),
        }
    }
}

/// Settings for the memory-only provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCacheSettings {
    pub absolute_expiration_relative_to_now_secs: u64,
    pub size_limit: u64,
}

impl Default for MemoryCacheSettings {
    fn default() -> Self {
        let defaults = MemoryCacheOptions::default();
        Self {
            absolute_expiration_relative_to_now_secs: defaults
                .absolute_expiration_relative_to_now
                .as_secs(),
            size_limit: defaults.size_limit,
        }
    }
}

impl CacheSettings {
    /// Parse settings from YAML
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Parse settings from JSON
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load settings from a `.yaml`, `.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let settings = match extension.as_deref() {
            Some("json") => Self::from_json_str(&content)?,
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            _ => {
                return Err(Error::Settings(format!(
                    "Unsupported settings file format: {}",
                    path.display()
                )))
            }
        };

        debug!(path = %path.display(), "Token cache settings loaded");
        Ok(settings)
    }

    /// Convert into adapter options (without a failure callback)
    pub fn into_options(self) -> DistributedCacheOptions {
        DistributedCacheOptions {
            l1_size_limit: self.l1_size_limit,
            l1_expiration_ratio: self.l1_expiration_ratio,
            absolute_expiration: self.absolute_expiration,
            absolute_expiration_relative_to_now: self
                .absolute_expiration_relative_to_now_secs
                .map(Duration::from_secs),
            sliding_expiration: self.sliding_expiration_secs.map(Duration::from_secs),
            disable_l1_cache: self.disable_l1_cache,
            encrypt: self.encrypt,
            enable_async_l2_write: self.enable_async_l2_write,
            on_l2_cache_failure: None,
        }
    }

    /// Options for the memory-only provider
    pub fn memory_options(&self) -> MemoryCacheOptions {
        MemoryCacheOptions {
            absolute_expiration_relative_to_now: Duration::from_secs(
                self.memory.absolute_expiration_relative_to_now_secs,
            ),
            size_limit: self.memory.size_limit,
        }
    }
}
