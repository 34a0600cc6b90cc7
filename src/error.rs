//! Error types for the token cache
//!
//! Provides structured error types for the cache bridge, the two-level
//! adapter, the distributed stores and cache encryption.

use thiserror::Error;

/// Unified error type for the token cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Settings parse error: {0}")]
    Settings(String),

    // =========================================================================
    // Distributed Store Errors
    // =========================================================================
    #[error("Distributed store unavailable: {store}")]
    StoreUnavailable { store: String },

    #[error("Distributed store operation failed: {store} - {operation}: {reason}")]
    StoreOperation {
        store: String,
        operation: String,
        reason: String,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    // =========================================================================
    // Payload Errors
    // =========================================================================
    #[error("Cache encryption error: {0}")]
    Encryption(String),

    #[error("Failed to deserialize token cache for key {key}: {reason}")]
    Deserialization { key: String, reason: String },
}

impl Error {
    /// Create a store operation error
    pub fn store_operation(
        store: impl Into<String>,
        operation: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Error::StoreOperation {
            store: store.into(),
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error came from a distributed store and may clear up on
    /// its own (connection loss, failover)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable { .. } | Error::StoreOperation { .. }
        )
    }

    /// Check if this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Settings(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Settings(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Settings(format!("IO error: {}", e))
    }
}

/// Result type alias for the token cache
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transient() {
        let unavailable = Error::StoreUnavailable {
            store: "redis".into(),
        };
        assert!(unavailable.is_transient());

        let failed = Error::store_operation("redis", "Read", "connection reset");
        assert!(failed.is_transient());
        assert_eq!(
            failed.to_string(),
            "Distributed store operation failed: redis - Read: connection reset"
        );

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_transient());

        let cancelled = Error::Cancelled {
            operation: "Write".into(),
        };
        assert!(!cancelled.is_transient());
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_settings_error_conversion() {
        let yaml_err = serde_yaml::from_str::<u32>("not: [a number").unwrap_err();
        let err: Error = yaml_err.into();
        assert!(matches!(err, Error::Settings(_)));
    }
}
