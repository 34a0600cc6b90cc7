//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use identity_token_cache::cache::{
    DeserializationError, DistributedEntryOptions, DistributedStore, InMemoryDistributedStore,
    StoredBlob, TokenCacheAccess,
};
use identity_token_cache::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Flaky Store
// =============================================================================

/// Store failing its next `failures` calls, then delegating
pub struct FlakyStore {
    pub inner: InMemoryDistributedStore,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryDistributedStore::new(),
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(u32::MAX)
    }

    /// Calls made through the store, failed ones included
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(Error::store_operation("flaky", operation, "connection reset by peer"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DistributedStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn get_entry(&self, key: &str) -> Result<Option<StoredBlob>> {
        self.check("get")?;
        self.inner.get_entry(key).await
    }

    async fn set(&self, key: &str, value: Bytes, options: DistributedEntryOptions) -> Result<()> {
        self.check("set")?;
        self.inner.set(key, value, options).await
    }

    async fn refresh(&self, key: &str) -> Result<()> {
        self.check("refresh")?;
        self.inner.refresh(key).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check("remove")?;
        self.inner.remove(key).await
    }
}

// =============================================================================
// Slow Store
// =============================================================================

/// Store whose writes wait until the test releases them
pub struct SlowStore {
    pub inner: InMemoryDistributedStore,
    gate: Semaphore,
}

impl SlowStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryDistributedStore::new(),
            gate: Semaphore::new(0),
        })
    }

    /// Let one pending or future write through
    pub fn release_one(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl DistributedStore for SlowStore {
    fn name(&self) -> &str {
        "slow"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn get_entry(&self, key: &str) -> Result<Option<StoredBlob>> {
        self.inner.get_entry(key).await
    }

    async fn set(&self, key: &str, value: Bytes, options: DistributedEntryOptions) -> Result<()> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::store_operation("slow", "set", e))?;
        permit.forget();
        self.inner.set(key, value, options).await
    }

    async fn refresh(&self, key: &str) -> Result<()> {
        self.inner.refresh(key).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }
}

// =============================================================================
// Fake Engine
// =============================================================================

/// Engine stand-in holding its token cache as raw bytes
#[derive(Default)]
pub struct FakeEngine {
    pub key: String,
    pub state: Vec<u8>,
    pub state_changed: bool,
    pub has_tokens: bool,
}

impl FakeEngine {
    pub fn for_key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    /// Simulate a token acquisition that changed the cache
    pub fn acquire(&mut self, state: &[u8]) {
        self.state = state.to_vec();
        self.state_changed = true;
        self.has_tokens = !state.is_empty();
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
        _clear_existing: bool,
    ) -> std::result::Result<(), DeserializationError> {
        match bytes {
            Some(b) => {
                serde_json::from_slice::<serde_json::Value>(b)
                    .map_err(|e| DeserializationError::parse(e.to_string()))?;
                self.state = b.to_vec();
                Ok(())
            }
            None => {
                self.state.clear();
                Ok(())
            }
        }
    }

    fn serialize(&self) -> Vec<u8> {
        self.state.clone()
    }
}
