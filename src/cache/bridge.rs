//! Token Cache Notification Bridge
//!
//! Connects a token-acquisition engine's cache notifications to a
//! [`TokenCacheStore`]. Before every access the engine's in-memory cache is
//! fully replaced by what the store holds; after an access that changed
//! state, the engine's cache is written back, or removed once no tokens are
//! left.

use crate::cache::hints::{CacheTelemetry, SerializerHints};
use crate::cache::TokenCacheStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

// =============================================================================
// Engine Interface
// =============================================================================

/// Error reported by the engine when it cannot load a serialized cache
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct DeserializationError {
    pub message: String,
    /// The blob is not valid serialized cache data (corrupt, or encrypted
    /// with a different key)
    pub parse_error: bool,
}

impl DeserializationError {
    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            parse_error: true,
        }
    }

    /// Create any other deserialization error
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            parse_error: false,
        }
    }
}

/// Arguments of one cache notification, provided by the engine
pub trait TokenCacheAccess: Send {
    /// Key of the cache being accessed (empty if the engine has none)
    fn suggested_cache_key(&self) -> &str;

    /// Whether the access changed the engine's cache
    fn has_state_changed(&self) -> bool;

    /// Whether the engine still holds at least one token for the key
    fn has_tokens(&self) -> bool;

    /// Suggested absolute expiry for the cache entry
    fn suggested_cache_expiry(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Cancellation signal for the store calls
    fn cancellation_token(&self) -> CancellationToken {
        CancellationToken::new()
    }

    /// Slot recording which cache level served the read
    fn telemetry(&self) -> Option<Arc<CacheTelemetry>> {
        None
    }

    /// Load serialized state into the engine's in-memory cache
    fn deserialize(
        &mut self,
        bytes: Option<&[u8]>,
        clear_existing: bool,
    ) -> std::result::Result<(), DeserializationError>;

    /// Serialize the engine's in-memory cache
    fn serialize(&self) -> Vec<u8>;
}

/// The three notification points an engine raises around a cache access
#[async_trait]
pub trait TokenCacheNotifications: Send + Sync {
    /// Called before the engine reads its cache
    async fn on_before_access(&self, args: &mut dyn TokenCacheAccess) -> Result<()>;

    /// Called after the engine accessed its cache
    async fn on_after_access(&self, args: &mut dyn TokenCacheAccess) -> Result<()>;

    /// Called before the engine writes its cache
    ///
    /// The returned guard, if any, must be held until the write completes.
    async fn on_before_write(&self, args: &mut dyn TokenCacheAccess) -> Result<Option<WriteGuard>>;
}

/// An engine that accepts notifications for its token caches
pub trait TokenCacheHost {
    /// Register notifications for the per-user token cache
    fn set_user_token_cache_notifications(&mut self, notifications: Arc<dyn TokenCacheNotifications>);

    /// Register notifications for the per-application token cache
    fn set_app_token_cache_notifications(&mut self, notifications: Arc<dyn TokenCacheNotifications>);
}

// =============================================================================
// Write Guard
// =============================================================================

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Per-key write lock, released when dropped
pub struct WriteGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
}

impl WriteGuard {
    /// Key this guard locks
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for WriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteGuard").field("key", &self.key).finish()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Drop the table entry once nobody holds or waits for the lock
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

// =============================================================================
// Token Cache Serializer
// =============================================================================

/// Bridge between engine notifications and a token cache store
pub struct TokenCacheSerializer<S> {
    store: S,
    /// Keyed write locks (None = before-write is a no-op)
    write_locks: Option<Arc<LockTable>>,
}

impl<S: TokenCacheStore> TokenCacheSerializer<S> {
    /// Create a bridge over a store
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_locks: None,
        }
    }

    /// Serialize concurrent writers of the same key
    pub fn with_write_serialization(mut self) -> Self {
        self.write_locks = Some(Arc::new(DashMap::new()));
        self
    }

    /// Get the underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Remove the user token cache of an account
    pub async fn clear(&self, home_account_id: &str) -> Result<()> {
        debug!(key = %home_account_id, "Clearing user token cache");
        self.store
            .remove_key(home_account_id, &SerializerHints::default())
            .await
    }

    /// Register this bridge on both token caches of a host
    pub fn initialize(self: Arc<Self>, host: &mut dyn TokenCacheHost)
    where
        S: 'static,
    {
        host.set_user_token_cache_notifications(self.clone());
        host.set_app_token_cache_notifications(self);
    }

    fn hints_from_args(args: &dyn TokenCacheAccess) -> SerializerHints {
        SerializerHints {
            cancellation: args.cancellation_token(),
            suggested_cache_expiry: args.suggested_cache_expiry(),
            telemetry: args.telemetry(),
        }
    }
}

impl<S> std::fmt::Debug for TokenCacheSerializer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCacheSerializer")
            .field("write_serialization", &self.write_locks.is_some())
            .finish()
    }
}

#[async_trait]
impl<S: TokenCacheStore> TokenCacheNotifications for TokenCacheSerializer<S> {
    async fn on_before_access(&self, args: &mut dyn TokenCacheAccess) -> Result<()> {
        let key = args.suggested_cache_key().to_string();
        if key.is_empty() {
            return Ok(());
        }

        let hints = Self::hints_from_args(args);
        let bytes = self.store.read_bytes(&key, &hints).await?;

        // Deserialize even when nothing was read, so the engine's cache is
        // reset when the store is empty
        if let Err(e) = args.deserialize(bytes.as_deref(), true) {
            error!(
                key = %key,
                encrypted = self.store.is_encrypted(),
                error = %e,
                "Failed to deserialize token cache"
            );
            let reason = if e.parse_error {
                format!(
                    "the cache is corrupt or was encrypted with a different key ({})",
                    e.message
                )
            } else {
                e.message
            };
            return Err(Error::Deserialization { key, reason });
        }

        Ok(())
    }

    async fn on_after_access(&self, args: &mut dyn TokenCacheAccess) -> Result<()> {
        if !args.has_state_changed() {
            return Ok(());
        }

        let key = args.suggested_cache_key().to_string();
        if key.is_empty() {
            debug!("Token cache changed without a cache key; not persisted");
            return Ok(());
        }

        let hints = Self::hints_from_args(args);
        if args.has_tokens() {
            let bytes = Bytes::from(args.serialize());
            self.store.write_bytes(&key, bytes, &hints).await
        } else {
            self.store.remove_key(&key, &hints).await
        }
    }

    async fn on_before_write(&self, args: &mut dyn TokenCacheAccess) -> Result<Option<WriteGuard>> {
        let Some(locks) = &self.write_locks else {
            return Ok(None);
        };

        let key = args.suggested_cache_key().to_string();
        if key.is_empty() {
            return Ok(None);
        }

        let lock = locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = lock.lock_owned().await;

        Ok(Some(WriteGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(locks),
        }))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::options::MemoryCacheOptions;
    use crate::cache::MemoryTokenCacheProvider;
    use assert_matches::assert_matches;
    use std::time::Duration;

    /// Engine stand-in holding its cache as raw bytes
    #[derive(Default)]
    struct FakeEngine {
        key: String,
        state: Vec<u8>,
        state_changed: bool,
        has_tokens: bool,
        deserialize_calls: Vec<(Option<Vec<u8>>, bool)>,
        reject: Option<DeserializationError>,
    }

    impl FakeEngine {
        fn for_key(key: &str) -> Self {
            Self {
                key: key.to_string(),
                ..Default::default()
            }
        }
    }

    impl TokenCacheAccess for FakeEngine {
        fn suggested_cache_key(&self) -> &str {
            &self.key
        }

        fn has_state_changed(&self) -> bool {
            self.state_changed
        }

        fn has_tokens(&self) -> bool {
            self.has_tokens
        }

        fn deserialize(
            &mut self,
            bytes: Option<&[u8]>,
            clear_existing: bool,
        ) -> std::result::Result<(), DeserializationError> {
            self.deserialize_calls
                .push((bytes.map(|b| b.to_vec()), clear_existing));
            if let Some(e) = self.reject.clone() {
                return Err(e);
            }
            self.state = bytes.map(|b| b.to_vec()).unwrap_or_default();
            Ok(())
        }

        fn serialize(&self) -> Vec<u8> {
            self.state.clone()
        }
    }

    fn serializer() -> TokenCacheSerializer<MemoryTokenCacheProvider> {
        TokenCacheSerializer::new(MemoryTokenCacheProvider::new(MemoryCacheOptions::default()).unwrap())
    }

    #[tokio::test]
    async fn test_before_access_deserializes_even_when_empty() {
        let bridge = serializer();
        let mut engine = FakeEngine::for_key("user1");
        engine.state = b"stale in-process state".to_vec();

        bridge.on_before_access(&mut engine).await.unwrap();

        assert_eq!(engine.deserialize_calls, vec![(None, true)]);
        assert!(engine.state.is_empty());
    }

    #[tokio::test]
    async fn test_before_access_full_replace() {
        let bridge = serializer();
        bridge
            .store()
            .write_bytes("user1", Bytes::from_static(b"stored"), &SerializerHints::new())
            .await
            .unwrap();

        let mut engine = FakeEngine::for_key("user1");
        engine.state = b"other".to_vec();
        bridge.on_before_access(&mut engine).await.unwrap();

        assert_eq!(engine.state, b"stored".to_vec());
        assert_eq!(engine.deserialize_calls, vec![(Some(b"stored".to_vec()), true)]);
    }

    #[tokio::test]
    async fn test_empty_key_ignored() {
        let bridge = serializer();
        let mut engine = FakeEngine::for_key("");
        engine.state_changed = true;
        engine.has_tokens = true;

        bridge.on_before_access(&mut engine).await.unwrap();
        bridge.on_after_access(&mut engine).await.unwrap();
        assert!(engine.deserialize_calls.is_empty());
        assert_eq!(bridge.store().storage().entry_count(), 0);
    }

    #[tokio::test]
    async fn test_after_access_writes_or_removes() {
        let bridge = serializer();
        let mut engine = FakeEngine::for_key("user1");
        engine.state = b"tokens".to_vec();
        engine.has_tokens = true;

        // Unchanged state is not persisted
        bridge.on_after_access(&mut engine).await.unwrap();
        assert!(!bridge.store().storage().contains("user1"));

        engine.state_changed = true;
        bridge.on_after_access(&mut engine).await.unwrap();
        assert_eq!(
            bridge.store().storage().get("user1"),
            Some(Bytes::from_static(b"tokens"))
        );

        // Last token gone: the entry is removed
        engine.has_tokens = false;
        bridge.on_after_access(&mut engine).await.unwrap();
        assert!(!bridge.store().storage().contains("user1"));
    }

    #[tokio::test]
    async fn test_deserialization_error_propagates() {
        let bridge = serializer();
        let mut engine = FakeEngine::for_key("user1");
        engine.reject = Some(DeserializationError::parse("unexpected token at 0"));

        let result = bridge.on_before_access(&mut engine).await;
        assert_matches!(
            result,
            Err(Error::Deserialization { ref key, ref reason })
                if key == "user1" && reason.contains("unexpected token at 0")
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let bridge = serializer();
        bridge
            .store()
            .write_bytes("account-1", Bytes::from_static(b"tokens"), &SerializerHints::new())
            .await
            .unwrap();

        bridge.clear("account-1").await.unwrap();
        assert!(!bridge.store().storage().contains("account-1"));
        // Clearing an unknown account is a no-op
        bridge.clear("account-2").await.unwrap();
    }

    #[tokio::test]
    async fn test_before_write_noop_by_default() {
        let bridge = serializer();
        let mut engine = FakeEngine::for_key("user1");
        assert!(bridge.on_before_write(&mut engine).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_before_write_serializes_same_key() {
        let bridge = Arc::new(serializer().with_write_serialization());
        let mut first = FakeEngine::for_key("user1");
        let guard = bridge.on_before_write(&mut first).await.unwrap().unwrap();
        assert_eq!(guard.key(), "user1");

        // A different key is not blocked
        let mut other = FakeEngine::for_key("user2");
        let other_guard = bridge.on_before_write(&mut other).await.unwrap();
        assert!(other_guard.is_some());

        let contender = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let mut second = FakeEngine::for_key("user1");
                bridge.on_before_write(&mut second).await.unwrap().is_some()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert!(tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap());
    }

    #[tokio::test]
    async fn test_lock_table_cleaned_up() {
        let bridge = serializer().with_write_serialization();
        let mut engine = FakeEngine::for_key("user1");

        let guard = bridge.on_before_write(&mut engine).await.unwrap();
        assert_eq!(bridge.write_locks.as_ref().unwrap().len(), 1);
        drop(guard);
        assert!(bridge.write_locks.as_ref().unwrap().is_empty());
    }

    #[derive(Default)]
    struct FakeHost {
        user: Option<Arc<dyn TokenCacheNotifications>>,
        app: Option<Arc<dyn TokenCacheNotifications>>,
    }

    impl TokenCacheHost for FakeHost {
        fn set_user_token_cache_notifications(&mut self, notifications: Arc<dyn TokenCacheNotifications>) {
            self.user = Some(notifications);
        }

        fn set_app_token_cache_notifications(&mut self, notifications: Arc<dyn TokenCacheNotifications>) {
            self.app = Some(notifications);
        }
    }

    #[tokio::test]
    async fn test_initialize_registers_both_caches() {
        let bridge = Arc::new(serializer());
        let mut host = FakeHost::default();
        bridge.initialize(&mut host);

        let user = host.user.unwrap();
        let app = host.app.unwrap();

        let mut engine = FakeEngine::for_key("app-client-id");
        engine.state = b"app tokens".to_vec();
        engine.state_changed = true;
        engine.has_tokens = true;
        app.on_after_access(&mut engine).await.unwrap();

        // Both registrations share one store
        let mut reader = FakeEngine::for_key("app-client-id");
        user.on_before_access(&mut reader).await.unwrap();
        assert_eq!(reader.state, b"app tokens".to_vec());
    }
}
