//! Two-Level Distributed Token Cache Adapter
//!
//! Implements the token cache store primitives with a bounded in-process L1
//! in front of a distributed L2. L2 stays the shared source of truth; L1 only
//! ever holds plaintext blobs for at most `l1_expiration_ratio` of the L2
//! lifetime.
//!
//! Every L2 call goes through a retry wrapper: an attempt that fails is
//! retried exactly once when the application's failure callback asks for it.
//! Writes can be left running in the background when L1 is enabled.

use crate::cache::events::{CacheEvent, L2Operation};
use crate::cache::hints::SerializerHints;
use crate::cache::metrics::{CacheStatsSnapshot, TokenCacheMetrics};
use crate::cache::options::{earliest, DistributedCacheOptions};
use crate::cache::protection::DataProtectorRef;
use crate::cache::storage::{DistributedStoreRef, MemoryStorage};
use crate::cache::tier::CacheLevel;
use crate::cache::TokenCacheStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default capacity of the event broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`DistributedTokenCacheAdapter`]
pub struct DistributedTokenCacheAdapterBuilder {
    store: DistributedStoreRef,
    options: DistributedCacheOptions,
    protector: Option<DataProtectorRef>,
    event_channel_capacity: usize,
}

impl DistributedTokenCacheAdapterBuilder {
    /// Set the adapter options
    pub fn options(mut self, options: DistributedCacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the protector used when `encrypt` is on
    pub fn protector(mut self, protector: DataProtectorRef) -> Self {
        self.protector = Some(protector);
        self
    }

    /// Set the event channel capacity
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Validate the configuration and build the adapter
    pub fn build(self) -> Result<DistributedTokenCacheAdapter> {
        DistributedTokenCacheAdapter::with_event_capacity(
            self.store,
            self.options,
            self.protector,
            self.event_channel_capacity,
        )
    }
}

// =============================================================================
// Adapter
// =============================================================================

struct AdapterInner {
    /// L1 in-process storage (None when disabled)
    l1: Option<MemoryStorage>,
    /// L2 distributed store
    l2: DistributedStoreRef,
    /// Set only when encryption is on
    protector: Option<DataProtectorRef>,
    options: DistributedCacheOptions,
    metrics: TokenCacheMetrics,
    /// L2 operations currently running in spawned tasks
    background_in_flight: AtomicU64,
    event_tx: broadcast::Sender<CacheEvent>,
}

/// Two-level (L1 memory + L2 distributed) token cache store
///
/// Cheap to clone; clones share both cache levels.
#[derive(Clone)]
pub struct DistributedTokenCacheAdapter {
    inner: Arc<AdapterInner>,
}

impl std::fmt::Debug for DistributedTokenCacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedTokenCacheAdapter")
            .field("store", &self.inner.l2.name())
            .field("l1_enabled", &self.inner.l1.is_some())
            .field("encrypt", &self.inner.protector.is_some())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl DistributedTokenCacheAdapter {
    /// Start building an adapter over a distributed store
    pub fn builder(store: DistributedStoreRef) -> DistributedTokenCacheAdapterBuilder {
        DistributedTokenCacheAdapterBuilder {
            store,
            options: DistributedCacheOptions::default(),
            protector: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }

    /// Create an adapter, failing fast on invalid options
    pub fn new(
        store: DistributedStoreRef,
        options: DistributedCacheOptions,
        protector: Option<DataProtectorRef>,
    ) -> Result<Self> {
        Self::with_event_capacity(store, options, protector, DEFAULT_EVENT_CHANNEL_CAPACITY)
    }

    fn with_event_capacity(
        store: DistributedStoreRef,
        options: DistributedCacheOptions,
        protector: Option<DataProtectorRef>,
        event_channel_capacity: usize,
    ) -> Result<Self> {
        options.validate()?;

        let protector = if options.encrypt {
            match protector {
                Some(protector) => Some(protector),
                None => {
                    return Err(Error::Configuration(
                        "encrypt is set but no data protector was supplied".to_string(),
                    ))
                }
            }
        } else {
            if protector.is_some() {
                debug!("Data protector supplied but encrypt is off; blobs stay unencrypted");
            }
            None
        };

        let l1 = if options.disable_l1_cache {
            None
        } else {
            Some(MemoryStorage::with_capacity(options.l1_size_limit))
        };

        let (event_tx, _) = broadcast::channel(event_channel_capacity);

        info!(
            store = %store.name(),
            l1_enabled = l1.is_some(),
            l1_size_limit = options.l1_size_limit,
            l1_expiration_ratio = options.l1_expiration_ratio,
            encrypt = protector.is_some(),
            async_l2_write = options.enable_async_l2_write,
            "Distributed token cache adapter initialized"
        );

        Ok(Self {
            inner: Arc::new(AdapterInner {
                l1,
                l2: store,
                protector,
                options,
                metrics: TokenCacheMetrics::new(),
                background_in_flight: AtomicU64::new(0),
                event_tx,
            }),
        })
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Get the adapter options
    pub fn options(&self) -> &DistributedCacheOptions {
        &self.inner.options
    }

    /// Get the L1 storage, if enabled
    pub fn l1(&self) -> Option<&MemoryStorage> {
        self.inner.l1.as_ref()
    }

    /// Check whether L1 is enabled
    pub fn is_l1_enabled(&self) -> bool {
        self.inner.l1.is_some()
    }

    /// Number of L2 writes and refreshes still running in the background
    pub fn background_in_flight(&self) -> u64 {
        self.inner.background_in_flight.load(Ordering::Acquire)
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        let (entries, size) = self
            .inner
            .l1
            .as_ref()
            .map(|l1| (l1.entry_count(), l1.size_bytes()))
            .unwrap_or((0, 0));
        self.inner.metrics.snapshot(entries, size)
    }

    /// Touch the L2 entry in the background so its sliding window stays alive
    /// while reads are served from L1
    fn spawn_refresh(&self, key: &str, hints: &SerializerHints) {
        if self.inner.options.sliding_expiration.is_none() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let cancellation = hints.cancellation.clone();
        inner.background_in_flight.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            // Failures are logged and emitted by the retry wrapper
            let _ = inner
                .run_l2(L2Operation::Refresh, &key, &cancellation, true, || {
                    inner.l2.refresh(&key)
                })
                .await;
            inner.background_in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Copy an L2 hit into L1, never past the L2 entry's own expiry
    fn back_propagate(
        &self,
        l1: &MemoryStorage,
        key: &str,
        data: &Bytes,
        l2_expires_at: Option<chrono::DateTime<Utc>>,
        hints: &SerializerHints,
    ) {
        let now = Utc::now();
        let expiry = earliest(
            self.inner
                .options
                .l1_expiry(hints.suggested_cache_expiry, now),
            l2_expires_at,
        );

        if !self.inner.set_l1(l1, key, data, expiry) {
            return;
        }

        self.inner.metrics.record_back_propagation();
        debug!(
            key = %key,
            size = data.len(),
            l1_entries = l1.entry_count(),
            l1_size_bytes = l1.size_bytes(),
            "Back-propagated blob from L2 to L1"
        );
        self.inner.emit_event(CacheEvent::BackPropagate {
            key: key.to_string(),
            size_bytes: data.len() as u64,
            l1_entries: l1.entry_count(),
            l1_size_bytes: l1.size_bytes(),
        });
    }
}

impl AdapterInner {
    /// Emit a cache event
    fn emit_event(&self, event: CacheEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Ask the application whether a failed L2 operation should be retried
    fn should_retry(&self, error: &Error) -> bool {
        self.options
            .on_l2_cache_failure
            .as_ref()
            .map(|callback| callback(error))
            .unwrap_or(false)
    }

    /// Run one L2 operation, racing cancellation, retrying at most once
    async fn run_l2<T, F, Fut>(
        &self,
        operation: L2Operation,
        key: &str,
        cancellation: &CancellationToken,
        background: bool,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut in_retry = false;

        loop {
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancellation.cancelled() => Err(Error::Cancelled {
                    operation: format!("L2 {}", operation),
                }),
                result = attempt() => result,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let error = match result {
                Ok(value) => {
                    debug!(
                        operation = %operation,
                        key = %key,
                        in_retry,
                        elapsed_ms,
                        "L2 operation completed"
                    );
                    return Ok(value);
                }
                Err(e) => e,
            };

            // Background cancellation is reported as a failure
            let cancelled = error.is_cancelled();
            if cancelled && !background {
                debug!(operation = %operation, key = %key, in_retry, elapsed_ms, "L2 operation cancelled");
                return Err(error);
            }

            self.metrics.l2.record_error();

            if !cancelled && !in_retry && self.should_retry(&error) {
                warn!(
                    operation = %operation,
                    key = %key,
                    in_retry,
                    elapsed_ms,
                    error = %error,
                    "L2 operation failed, retrying once"
                );
                self.metrics.l2.record_retry();
                self.emit_event(CacheEvent::L2Retry {
                    key: key.to_string(),
                    operation,
                    error: error.to_string(),
                });
                in_retry = true;
                continue;
            }

            error!(
                operation = %operation,
                key = %key,
                in_retry,
                background,
                elapsed_ms,
                error = %error,
                "L2 operation failed"
            );
            self.emit_event(CacheEvent::l2_failure(key, operation, &error, background));
            return Err(error);
        }
    }

    /// Store a blob in L1; false when it was not cached
    fn set_l1(
        &self,
        l1: &MemoryStorage,
        key: &str,
        data: &Bytes,
        expiry: Option<chrono::DateTime<Utc>>,
    ) -> bool {
        let evictions_before = l1.eviction_count();
        let cached = l1.set(key, data.clone(), expiry);

        if cached {
            self.metrics.l1.record_write();
        } else {
            self.metrics.l1.record_error();
            warn!(
                key = %key,
                size = data.len(),
                expiry = ?expiry,
                "Blob not cached in L1 (already expired or larger than L1)"
            );
        }

        let evicted = l1.eviction_count().saturating_sub(evictions_before);
        if evicted > 0 {
            self.metrics.l1.record_evictions(evicted);
            self.emit_event(CacheEvent::L1Evicted {
                key: key.to_string(),
                evicted,
            });
        }

        cached
    }

    /// Encrypt a blob for L2, if encryption is on
    fn protect(&self, data: &Bytes) -> Result<Bytes> {
        match &self.protector {
            Some(protector) => Ok(Bytes::from(protector.protect(data)?)),
            None => Ok(data.clone()),
        }
    }

    /// Decrypt a blob read from L2, if encryption is on
    ///
    /// Blobs that fail to decrypt are returned as-is: they were written
    /// before encryption was switched on.
    fn unprotect(&self, key: &str, stored: Bytes) -> Bytes {
        let Some(protector) = &self.protector else {
            return stored;
        };

        match protector.unprotect(&stored) {
            Ok(plaintext) => Bytes::from(plaintext),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to decrypt L2 blob, using raw bytes");
                stored
            }
        }
    }
}

// =============================================================================
// TokenCacheStore Implementation
// =============================================================================

#[async_trait]
impl TokenCacheStore for DistributedTokenCacheAdapter {
    async fn read_bytes(&self, key: &str, hints: &SerializerHints) -> Result<Option<Bytes>> {
        let inner = &self.inner;

        if let Some(l1) = &inner.l1 {
            if let Some(data) = l1.get(key) {
                inner.metrics.l1.record_hit();
                hints.record_cache_level(CacheLevel::L1Cache);
                inner.emit_event(CacheEvent::hit(key, CacheLevel::L1Cache));
                debug!(key = %key, size = data.len(), "Token cache hit (L1)");

                self.spawn_refresh(key, hints);
                return Ok(Some(data));
            }
            inner.metrics.l1.record_miss();
        }

        let stored = inner
            .run_l2(L2Operation::Read, key, &hints.cancellation, false, || {
                inner.l2.get_entry(key)
            })
            .await?;

        let Some(stored) = stored else {
            inner.metrics.l2.record_miss();
            hints.record_cache_level(CacheLevel::None);
            inner.emit_event(CacheEvent::miss(key));
            debug!(key = %key, "Token cache miss");
            return Ok(None);
        };

        inner.metrics.l2.record_hit();
        let data = inner.unprotect(key, stored.data);
        hints.record_cache_level(CacheLevel::L2Cache);
        inner.emit_event(CacheEvent::hit(key, CacheLevel::L2Cache));
        debug!(key = %key, size = data.len(), "Token cache hit (L2)");

        if let Some(l1) = &inner.l1 {
            self.back_propagate(l1, key, &data, stored.expires_at, hints);
        }

        Ok(Some(data))
    }

    async fn write_bytes(&self, key: &str, bytes: Bytes, hints: &SerializerHints) -> Result<()> {
        let inner = &self.inner;
        let suggested = hints.suggested_cache_expiry;

        let l1_cached = match &inner.l1 {
            Some(l1) => {
                let expiry = inner.options.l1_expiry(suggested, Utc::now());
                inner.set_l1(l1, key, &bytes, expiry)
            }
            None => false,
        };

        let entry_options = inner.options.l2_entry_options(suggested);
        let payload = inner.protect(&bytes)?;
        let background = inner.l1.is_some() && inner.options.enable_async_l2_write;

        if background {
            inner.metrics.record_background_write();
            inner.background_in_flight.fetch_add(1, Ordering::AcqRel);

            let task_inner = Arc::clone(inner);
            let task_key = key.to_string();
            let cancellation = hints.cancellation.clone();
            tokio::spawn(async move {
                let result = task_inner
                    .run_l2(L2Operation::Write, &task_key, &cancellation, true, || {
                        task_inner
                            .l2
                            .set(&task_key, payload.clone(), entry_options.clone())
                    })
                    .await;
                if result.is_ok() {
                    task_inner.metrics.l2.record_write();
                }
                task_inner
                    .background_in_flight
                    .fetch_sub(1, Ordering::AcqRel);
            });
        } else {
            inner
                .run_l2(L2Operation::Write, key, &hints.cancellation, false, || {
                    inner.l2.set(key, payload.clone(), entry_options.clone())
                })
                .await?;
            inner.metrics.l2.record_write();
        }

        debug!(
            key = %key,
            size = bytes.len(),
            l1_cached,
            l2_background = background,
            "Token cache written"
        );
        inner.emit_event(CacheEvent::Write {
            key: key.to_string(),
            size_bytes: bytes.len() as u64,
            l1_cached,
            l2_background: background,
        });

        Ok(())
    }

    async fn remove_key(&self, key: &str, hints: &SerializerHints) -> Result<()> {
        let inner = &self.inner;

        if let Some(l1) = &inner.l1 {
            if l1.remove(key).is_some() {
                inner.metrics.l1.record_remove();
            }
        }

        inner
            .run_l2(L2Operation::Remove, key, &hints.cancellation, false, || {
                inner.l2.remove(key)
            })
            .await?;
        inner.metrics.l2.record_remove();

        debug!(key = %key, "Token cache removed");
        inner.emit_event(CacheEvent::Remove {
            key: key.to_string(),
        });
        Ok(())
    }

    fn is_encrypted(&self) -> bool {
        self.inner.protector.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================
