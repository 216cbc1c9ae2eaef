//! Expiring key-value caches behind the TTL-keyed backend
//!
//! [`ExpiringCache`] is the seam between [`TtlCheckpointSaver`](super::TtlCheckpointSaver)
//! and a concrete store. Every multi-key mutation is a single cache call so that
//! implementations can make it atomic (one lock scope in memory, one Lua script
//! on Redis).
//!
//! Key layout for a thread prefix `{namespace}:{thread_id}`:
//!
//! ```text
//! {prefix}:latest        decimal id of the newest checkpoint
//! {prefix}:{id}          encoded checkpoint record
//! {prefix}:{id}:writes   list of encoded pending writes
//! ```

use super::keys;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Failures reported by a cache implementation
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache could not be reached
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// The cache answered with an error or with malformed data
    #[error("cache command failed: {0}")]
    Command(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Key-value store with per-key expiry
#[async_trait]
pub trait ExpiringCache: Send + Sync + 'static {
    /// Whether data survives a restart of this process
    fn durable(&self) -> bool {
        false
    }

    /// Verify the cache is reachable
    async fn ping(&self) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Values for `keys`, positionally; missing or expired keys yield `None`
    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>>;

    /// Atomically append a checkpoint to the log under `prefix`.
    ///
    /// Allocates `latest + 1`, stores `record` and `writes` under it, moves the
    /// latest pointer, and resets the expiry of every key in the log to `ttl`.
    /// Returns the allocated id.
    async fn append(
        &self,
        prefix: &str,
        record: Vec<u8>,
        writes: Vec<Vec<u8>>,
        ttl: Duration,
    ) -> CacheResult<u64>;

    /// Push `values` onto the list at `list_key` if `guard_key` is live.
    ///
    /// The list expires together with the guard. Returns `false` when the
    /// guard is missing.
    async fn push_if_exists(
        &self,
        guard_key: &str,
        list_key: &str,
        values: Vec<Vec<u8>>,
    ) -> CacheResult<bool>;

    /// Whole list at `key`, empty when missing
    async fn list_range(&self, key: &str) -> CacheResult<Vec<Vec<u8>>>;

    /// Remove every key in the log under `prefix`
    async fn delete_log(&self, prefix: &str) -> CacheResult<()>;
}

#[derive(Debug, Clone)]
enum Slot {
    Bytes(Vec<u8>),
    List(Vec<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    slot: Slot,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local [`ExpiringCache`]
///
/// Entries expire lazily on access; [`purge_expired`](Self::purge_expired)
/// reclaims memory held by threads nobody reads again. Time comes from
/// [`tokio::time::Instant`], so paused-clock tests can advance past a TTL
/// without sleeping.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    data: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired(now));
        before - data.len()
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live<'a>(
    data: &'a mut HashMap<String, CacheEntry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut CacheEntry> {
    if data.get(key).is_some_and(|entry| entry.is_expired(now)) {
        data.remove(key);
        return None;
    }
    data.get_mut(key)
}

fn live_bytes(data: &mut HashMap<String, CacheEntry>, key: &str, now: Instant) -> Option<Vec<u8>> {
    match live(data, key, now) {
        Some(CacheEntry {
            slot: Slot::Bytes(bytes),
            ..
        }) => Some(bytes.clone()),
        _ => None,
    }
}

fn latest_id(data: &mut HashMap<String, CacheEntry>, prefix: &str, now: Instant) -> CacheResult<u64> {
    match live_bytes(data, &keys::latest(prefix), now) {
        Some(bytes) => keys::parse_id(&bytes)
            .ok_or_else(|| CacheError::Command(format!("corrupt latest pointer under {prefix}"))),
        None => Ok(0),
    }
}

#[async_trait]
impl ExpiringCache for InMemoryCache {
    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut data = self.data.lock();
        Ok(live_bytes(&mut data, key, Instant::now()))
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let now = Instant::now();
        let mut data = self.data.lock();
        Ok(keys
            .iter()
            .map(|key| live_bytes(&mut data, key, now))
            .collect())
    }

    async fn append(
        &self,
        prefix: &str,
        record: Vec<u8>,
        writes: Vec<Vec<u8>>,
        ttl: Duration,
    ) -> CacheResult<u64> {
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut data = self.data.lock();

        let seq = latest_id(&mut data, prefix, now)? + 1;

        // Older records expire together with the newest one; O(history).
        for id in 1..seq {
            for key in [keys::record(prefix, id), keys::writes(prefix, id)] {
                if let Some(entry) = live(&mut data, &key, now) {
                    entry.expires_at = expires_at;
                }
            }
        }

        data.insert(
            keys::record(prefix, seq),
            CacheEntry {
                slot: Slot::Bytes(record),
                expires_at,
            },
        );
        if !writes.is_empty() {
            data.insert(
                keys::writes(prefix, seq),
                CacheEntry {
                    slot: Slot::List(writes),
                    expires_at,
                },
            );
        }
        data.insert(
            keys::latest(prefix),
            CacheEntry {
                slot: Slot::Bytes(seq.to_string().into_bytes()),
                expires_at,
            },
        );

        Ok(seq)
    }

    async fn push_if_exists(
        &self,
        guard_key: &str,
        list_key: &str,
        values: Vec<Vec<u8>>,
    ) -> CacheResult<bool> {
        let now = Instant::now();
        let mut data = self.data.lock();

        let Some(expires_at) = live(&mut data, guard_key, now).map(|entry| entry.expires_at) else {
            return Ok(false);
        };

        match live(&mut data, list_key, now) {
            Some(CacheEntry {
                slot: Slot::List(items),
                ..
            }) => items.extend(values),
            Some(_) => {
                return Err(CacheError::Command(format!(
                    "{list_key} does not hold a list"
                )))
            }
            None => {
                data.insert(
                    list_key.to_string(),
                    CacheEntry {
                        slot: Slot::List(values),
                        expires_at,
                    },
                );
            }
        }
        Ok(true)
    }

    async fn list_range(&self, key: &str) -> CacheResult<Vec<Vec<u8>>> {
        let mut data = self.data.lock();
        match live(&mut data, key, Instant::now()) {
            Some(CacheEntry {
                slot: Slot::List(items),
                ..
            }) => Ok(items.clone()),
            Some(_) => Err(CacheError::Command(format!("{key} does not hold a list"))),
            None => Ok(Vec::new()),
        }
    }

    async fn delete_log(&self, prefix: &str) -> CacheResult<()> {
        let now = Instant::now();
        let mut data = self.data.lock();
        let latest = latest_id(&mut data, prefix, now)?;
        for id in 1..=latest {
            data.remove(&keys::record(prefix, id));
            data.remove(&keys::writes(prefix, id));
        }
        data.remove(&keys::latest(prefix));
        Ok(())
    }
}
