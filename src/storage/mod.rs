//! Storage adapters for access counting and block state.

pub mod memory;
pub mod redis;

pub use memory::MemoryStorageAdapter;
pub use redis::RedisStorageAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Trait for rate limit storage backends.
///
/// An adapter owns the sliding-window access counts and the block records
/// for every `(key_type, key)` identity. The in-memory implementation keeps
/// both in-process; the redis implementation shares them across processes.
/// Either way the contract is the same, and all operations must be safe
/// under arbitrary concurrent invocation for the same or different keys.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Record an access attempt for the identity, atomically with respect to
    /// other calls for the same key.
    ///
    /// Admits (and records the current instant) iff the number of live
    /// accesses in the trailing one-second window is below `max_accesses`.
    /// Returns whether the access was admitted and the live count after the
    /// call (the pre-existing count when refused).
    async fn increment_accesses(
        &self,
        key_type: &str,
        key: &str,
        max_accesses: i64,
    ) -> Result<(bool, i64)>;

    /// Return the block expiry for the identity iff it is still in the
    /// future. An expired block is removed and reported as absent.
    async fn get_block(&self, key_type: &str, key: &str) -> Result<Option<DateTime<Utc>>>;

    /// Install a block lasting `block_time_ms` from now, overwriting any
    /// previous block, and return its expiry.
    async fn add_block(
        &self,
        key_type: &str,
        key: &str,
        block_time_ms: i64,
    ) -> Result<DateTime<Utc>>;
}
