//! Redis-backed storage adapter for cross-process rate limiting.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::error::{Result, TurnpikeError};

use super::StorageAdapter;

/// Length of the sliding window in milliseconds.
const WINDOW_MS: i64 = 1_000;

/// Storage adapter backed by a shared redis instance.
///
/// Access windows are sorted sets scored by epoch milliseconds; blocks are
/// plain keys holding the epoch-millis expiry, with a matching redis-side TTL so
/// idle identities are reclaimed by the server. Network and protocol
/// failures surface as storage errors, never as a silent verdict.
pub struct RedisStorageAdapter {
    client: redis::Client,
}

impl RedisStorageAdapter {
    pub fn new(address: &str, password: &str, db: i64) -> Result<Self> {
        let url = if password.is_empty() {
            format!("redis://{address}/{db}")
        } else {
            format!("redis://:{password}@{address}/{db}")
        };
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn accesses_key(key_type: &str, key: &str) -> String {
        format!("ratelimit:accesses:{key_type}:{key}")
    }

    fn block_key(key_type: &str, key: &str) -> String {
        format!("ratelimit:block:{key_type}:{key}")
    }
}

#[async_trait]
impl StorageAdapter for RedisStorageAdapter {
    async fn increment_accesses(
        &self,
        key_type: &str,
        key: &str,
        max_accesses: i64,
    ) -> Result<(bool, i64)> {
        let mut conn = self.connection().await?;
        let accesses_key = Self::accesses_key(key_type, key);

        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .zrembyscore(&accesses_key, 0, now_ms - WINDOW_MS)
            .ignore()
            .zcard(&accesses_key)
            .query_async(&mut conn)
            .await?;

        if count >= max_accesses {
            return Ok((false, count));
        }

        // Member must be unique per access; millisecond scores can collide
        // under concurrency, so the member carries nanosecond precision.
        let member = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now_ms * 1_000_000);
        let _: () = redis::pipe()
            .atomic()
            .zadd(&accesses_key, member, now_ms)
            .ignore()
            .pexpire(&accesses_key, WINDOW_MS)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok((true, count + 1))
    }

    async fn get_block(&self, key_type: &str, key: &str) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.connection().await?;
        let block_key = Self::block_key(key_type, key);

        let stored: Option<i64> = conn.get(&block_key).await?;
        let Some(expiry_ms) = stored else {
            return Ok(None);
        };

        let until = DateTime::<Utc>::from_timestamp_millis(expiry_ms).ok_or_else(|| {
            TurnpikeError::Storage(format!("invalid block expiry stored for {block_key}"))
        })?;

        if until > Utc::now() {
            return Ok(Some(until));
        }

        let _: () = conn.del(&block_key).await?;
        Ok(None)
    }

    async fn add_block(
        &self,
        key_type: &str,
        key: &str,
        block_time_ms: i64,
    ) -> Result<DateTime<Utc>> {
        let mut conn = self.connection().await?;
        let block_key = Self::block_key(key_type, key);

        let until = Utc::now() + Duration::milliseconds(block_time_ms);
        let _: () = conn
            .pset_ex(&block_key, until.timestamp_millis(), block_time_ms.max(1) as u64)
            .await?;

        Ok(until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_address_without_password() {
        assert!(RedisStorageAdapter::new("127.0.0.1:6379", "", 0).is_ok());
    }

    #[test]
    fn test_new_accepts_address_with_password_and_db() {
        assert!(RedisStorageAdapter::new("127.0.0.1:6379", "hunter2", 3).is_ok());
    }

    #[test]
    fn test_keys_partition_by_type_and_resource() {
        assert_eq!(
            RedisStorageAdapter::accesses_key("IP", "10.0.0.1"),
            "ratelimit:accesses:IP:10.0.0.1"
        );
        assert_eq!(
            RedisStorageAdapter::block_key("TOKEN", "abc"),
            "ratelimit:block:TOKEN:abc"
        );
        assert_ne!(
            RedisStorageAdapter::accesses_key("IP", "x"),
            RedisStorageAdapter::accesses_key("TOKEN", "x")
        );
    }
}
