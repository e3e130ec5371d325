//! In-memory storage adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::error::Result;

use super::StorageAdapter;

/// Identity key: the caller-chosen category label plus the key text, so the
/// same key under different types never collides.
type IdentityKey = (String, String);

/// In-process storage adapter.
///
/// Window counts and block state are independent resources, each guarded by
/// its own mutex. The locks are coarse: one lock serializes all keys within
/// each resource. Records are created lazily on first access and pruned
/// lazily on the next access; keys that stop being accessed leave stale
/// entries resident.
#[derive(Default)]
pub struct MemoryStorageAdapter {
    accesses: Mutex<HashMap<IdentityKey, Vec<DateTime<Utc>>>>,
    blocks: Mutex<HashMap<IdentityKey, DateTime<Utc>>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn increment_accesses(
        &self,
        key_type: &str,
        key: &str,
        max_accesses: i64,
    ) -> Result<(bool, i64)> {
        let mut accesses = self.accesses.lock();
        let entry = accesses
            .entry((key_type.to_string(), key.to_string()))
            .or_default();

        // A timestamp is live iff it is strictly younger than one second.
        let now = Utc::now();
        entry.retain(|ts| now - *ts < Duration::seconds(1));

        let count = entry.len() as i64;
        if count >= max_accesses {
            return Ok((false, count));
        }

        entry.push(now);
        Ok((true, count + 1))
    }

    async fn get_block(&self, key_type: &str, key: &str) -> Result<Option<DateTime<Utc>>> {
        let mut blocks = self.blocks.lock();
        let identity = (key_type.to_string(), key.to_string());

        match blocks.get(&identity) {
            Some(until) if *until > Utc::now() => Ok(Some(*until)),
            Some(_) => {
                blocks.remove(&identity);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn add_block(
        &self,
        key_type: &str,
        key: &str,
        block_time_ms: i64,
    ) -> Result<DateTime<Utc>> {
        let mut blocks = self.blocks.lock();
        let until = Utc::now() + Duration::milliseconds(block_time_ms);
        blocks.insert((key_type.to_string(), key.to_string()), until);
        Ok(until)
    }
}
