//! Redis Distributed Store
//!
//! Distributed store backed by Redis through a deadpool connection pool.
//! Each key is a hash with three fields:
//!
//! - `data`: the blob
//! - `absexp`: hard deadline as unix milliseconds (-1 = none)
//! - `sldexp`: sliding window in milliseconds (-1 = none)
//!
//! The key TTL is kept at the effective expiry with `PEXPIRE`, so Redis
//! evicts dead entries on its own. Reads and refreshes slide the TTL forward,
//! never past the deadline.

use crate::cache::storage::{DistributedEntryOptions, DistributedStore, StoredBlob};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::debug;

const DATA_FIELD: &str = "data";
const ABSOLUTE_FIELD: &str = "absexp";
const SLIDING_FIELD: &str = "sldexp";
const NOT_PRESENT: i64 = -1;

/// Redis-backed distributed store
#[derive(Clone)]
pub struct RedisDistributedStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisDistributedStore {
    /// Create a store over an existing pool
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            key_prefix: String::new(),
        }
    }

    /// Create a store from a connection URL (`redis://host:port/db`)
    pub fn from_url(url: &str) -> Result<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Configuration(format!("Invalid Redis configuration: {}", e)))?;
        Ok(Self::new(pool))
    }

    /// Prefix every key, for sharing one Redis database between applications
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Check that a connection can be obtained
    pub async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::store_operation(self.name(), "connect", e))
    }

    /// Remaining TTL in milliseconds for an entry touched now
    fn sliding_ttl_ms(now_ms: i64, absolute_ms: i64, sliding_ms: i64) -> Option<i64> {
        if sliding_ms == NOT_PRESENT {
            return None;
        }
        if absolute_ms == NOT_PRESENT {
            Some(sliding_ms)
        } else {
            Some(sliding_ms.min(absolute_ms - now_ms))
        }
    }

    /// Expiry of an entry right after it was touched at `now_ms`
    fn expiry_after_touch(now_ms: i64, absolute_ms: i64, sliding_ms: i64) -> Option<DateTime<Utc>> {
        let expiry_ms = match Self::sliding_ttl_ms(now_ms, absolute_ms, sliding_ms) {
            Some(ttl) => now_ms + ttl,
            None if absolute_ms != NOT_PRESENT => absolute_ms,
            None => return None,
        };
        Utc.timestamp_millis_opt(expiry_ms).single()
    }

    async fn slide(
        &self,
        conn: &mut deadpool_redis::Connection,
        key: &str,
        now_ms: i64,
        absolute_ms: i64,
        sliding_ms: i64,
    ) -> Result<()> {
        let Some(ttl) = Self::sliding_ttl_ms(now_ms, absolute_ms, sliding_ms) else {
            return Ok(());
        };

        if ttl <= 0 {
            let _: () = redis::cmd("DEL")
                .arg(key)
                .query_async(conn)
                .await
                .map_err(|e| Error::store_operation(self.name(), "refresh", e))?;
        } else {
            let _: () = redis::cmd("PEXPIRE")
                .arg(key)
                .arg(ttl)
                .query_async(conn)
                .await
                .map_err(|e| Error::store_operation(self.name(), "refresh", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedStore for RedisDistributedStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.get_entry(key).await?.map(|blob| blob.data))
    }

    async fn get_entry(&self, key: &str) -> Result<Option<StoredBlob>> {
        let key = self.prefixed_key(key);
        let mut conn = self.connection().await?;

        let (data, absolute_ms, sliding_ms): (Option<Vec<u8>>, Option<i64>, Option<i64>) =
            redis::cmd("HMGET")
                .arg(&key)
                .arg(DATA_FIELD)
                .arg(ABSOLUTE_FIELD)
                .arg(SLIDING_FIELD)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::store_operation(self.name(), "get", e))?;

        let Some(data) = data else {
            return Ok(None);
        };

        let now_ms = Utc::now().timestamp_millis();
        let absolute_ms = absolute_ms.unwrap_or(NOT_PRESENT);
        let sliding_ms = sliding_ms.unwrap_or(NOT_PRESENT);
        self.slide(&mut conn, &key, now_ms, absolute_ms, sliding_ms)
            .await?;

        Ok(Some(StoredBlob {
            data: Bytes::from(data),
            expires_at: Self::expiry_after_touch(now_ms, absolute_ms, sliding_ms),
        }))
    }

    async fn set(&self, key: &str, value: Bytes, options: DistributedEntryOptions) -> Result<()> {
        let key = self.prefixed_key(key);
        let now = Utc::now();
        let absolute_ms = options
            .absolute_deadline(now)
            .map(|d| d.timestamp_millis())
            .unwrap_or(NOT_PRESENT);
        let sliding_ms = options
            .sliding_expiration
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(NOT_PRESENT);
        let ttl_ms = options
            .effective_expiry(now)
            .map(|expiry| (expiry - now).num_milliseconds());

        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(&key).ignore();
        match ttl_ms {
            Some(ttl) if ttl <= 0 => {
                // Already expired: the DEL above is the whole write
            }
            _ => {
                pipe.cmd("HSET")
                    .arg(&key)
                    .arg(DATA_FIELD)
                    .arg(value.as_ref())
                    .arg(ABSOLUTE_FIELD)
                    .arg(absolute_ms)
                    .arg(SLIDING_FIELD)
                    .arg(sliding_ms)
                    .ignore();
                if let Some(ttl) = ttl_ms {
                    pipe.cmd("PEXPIRE").arg(&key).arg(ttl).ignore();
                }
            }
        }

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store_operation(self.name(), "set", e))?;

        debug!(key = %key, size = value.len(), ttl_ms = ?ttl_ms, "Redis SET");
        Ok(())
    }

    async fn refresh(&self, key: &str) -> Result<()> {
        let key = self.prefixed_key(key);
        let mut conn = self.connection().await?;

        let (absolute_ms, sliding_ms): (Option<i64>, Option<i64>) = redis::cmd("HMGET")
            .arg(&key)
            .arg(ABSOLUTE_FIELD)
            .arg(SLIDING_FIELD)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store_operation(self.name(), "refresh", e))?;

        match sliding_ms {
            Some(sliding_ms) => {
                let now_ms = Utc::now().timestamp_millis();
                self.slide(
                    &mut conn,
                    &key,
                    now_ms,
                    absolute_ms.unwrap_or(NOT_PRESENT),
                    sliding_ms,
                )
                .await
            }
            None => Ok(()),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = self.prefixed_key(key);
        let mut conn = self.connection().await?;

        let _: () = redis::cmd("DEL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store_operation(self.name(), "remove", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sliding_ttl() {
        let now = 1_000_000;
        // No sliding window: TTL untouched
        assert_eq!(RedisDistributedStore::sliding_ttl_ms(now, NOT_PRESENT, NOT_PRESENT), None);
        assert_eq!(RedisDistributedStore::sliding_ttl_ms(now, NOT_PRESENT, 500), Some(500));
        // Window capped by the deadline
        assert_eq!(RedisDistributedStore::sliding_ttl_ms(now, now + 200, 500), Some(200));
        assert_eq!(RedisDistributedStore::sliding_ttl_ms(now, now - 1, 500), Some(-1));
    }

    #[test]
    fn test_expiry_after_touch() {
        let now = 1_700_000_000_000;
        assert_eq!(
            RedisDistributedStore::expiry_after_touch(now, NOT_PRESENT, NOT_PRESENT),
            None
        );
        assert_eq!(
            RedisDistributedStore::expiry_after_touch(now, now + 5_000, NOT_PRESENT)
                .map(|d| d.timestamp_millis()),
            Some(now + 5_000)
        );
        assert_eq!(
            RedisDistributedStore::expiry_after_touch(now, now + 5_000, 1_000)
                .map(|d| d.timestamp_millis()),
            Some(now + 1_000)
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisDistributedStore::from_url("not a url").is_err());
    }

    #[test]
    fn test_key_prefix() {
        let store = RedisDistributedStore::from_url("redis://127.0.0.1:6379")
            .unwrap()
            .with_key_prefix("tokens:");
        assert_eq!(store.prefixed_key("user1"), "tokens:user1");
    }
}
