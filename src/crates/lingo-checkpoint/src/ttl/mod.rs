//! Expiring, namespace-scoped checkpoint storage
//!
//! [`TtlCheckpointSaver`] stores each checkpoint under
//! `{namespace}:{thread_id}:{checkpoint_id}` and keeps a
//! `{namespace}:{thread_id}:latest` pointer, so resuming a thread is one
//! pointer lookup plus one record read. Every write resets the expiry of the
//! whole thread log, so an idle conversation disappears as a unit and the
//! pointer never outlives the record it names.
//!
//! That refresh touches every stored record of the thread, so a write costs
//! time linear in the thread's history. With `RedisCache` the refresh runs
//! inside one script and holds the server while it does, so long-lived
//! threads want a short TTL or an explicit `delete_thread`.
//!
//! Expiry is a documented loss window: once the TTL elapses, `get_latest`
//! reports nothing and the next invocation starts a fresh history.
//!
//! The backend is async-only. Two caches ship with the crate:
//!
//! - [`InMemoryCache`] - process-local, used for `memory://` URLs and tests
//! - `RedisCache` - shared across processes (cargo feature `redis`)
//!
//! # Example
//!
//! ```rust
//! use lingo_checkpoint::ttl::{InMemoryCache, TtlCheckpointSaver};
//! use lingo_checkpoint::{AsyncCheckpointSaver, ThreadKey};
//! use std::time::Duration;
//!
//! # async fn demo() -> lingo_checkpoint::Result<()> {
//! let saver = TtlCheckpointSaver::new(InMemoryCache::new(), Duration::from_secs(3600));
//! saver.setup().await?;
//!
//! let key = ThreadKey::thread("t1");
//! let id = saver.put(&key, serde_json::json!({"messages": []}), None).await?;
//! assert_eq!(saver.get_latest(&key).await?.map(|c| c.id), Some(id));
//! # Ok(())
//! # }
//! ```

mod cache;
#[cfg(feature = "redis")]
mod redis_cache;

pub use cache::{CacheError, CacheResult, ExpiringCache, InMemoryCache};
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

use crate::{
    checkpoint::{Checkpoint, CheckpointId, PendingWrite, ThreadKey},
    error::{CheckpointError, Result},
    serializer::{Codec, SerializerProtocol},
    timeout::{with_timeout, IoKind},
    traits::{AsyncCheckpointSaver, Capabilities, CheckpointBackend, CheckpointStream},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const BACKEND: &str = "ttl";

/// Records fetched per round trip by `list`
const PAGE_SIZE: u64 = 64;

/// Key construction shared by the saver and the cache implementations
pub(crate) mod keys {
    use crate::checkpoint::ThreadKey;

    pub(crate) fn prefix(key: &ThreadKey) -> String {
        format!("{}:{}", key.namespace, key.thread_id)
    }

    pub(crate) fn latest(prefix: &str) -> String {
        format!("{prefix}:latest")
    }

    pub(crate) fn record(prefix: &str, id: u64) -> String {
        format!("{prefix}:{id}")
    }

    pub(crate) fn writes(prefix: &str, id: u64) -> String {
        format!("{prefix}:{id}:writes")
    }

    pub(crate) fn parse_id(bytes: &[u8]) -> Option<u64> {
        std::str::from_utf8(bytes).ok()?.trim().parse().ok()
    }
}

/// Checkpoint body as stored; the id lives in the key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCheckpoint {
    parent_id: Option<CheckpointId>,
    written_at: DateTime<Utc>,
    payload: serde_json::Value,
}

fn decode_checkpoint(
    codec: Codec,
    key: &ThreadKey,
    id: u64,
    bytes: &[u8],
) -> Result<Checkpoint> {
    let stored: StoredCheckpoint = codec.loads(bytes)?;
    Ok(Checkpoint {
        id: CheckpointId::new(id),
        thread_id: key.thread_id.clone(),
        namespace: key.namespace.clone(),
        payload: stored.payload,
        parent_id: stored.parent_id,
        written_at: stored.written_at,
    })
}

/// Async checkpoint store over an [`ExpiringCache`]
pub struct TtlCheckpointSaver<C> {
    cache: Arc<C>,
    codec: Codec,
    ttl: Duration,
    op_timeout: Duration,
}

impl<C: ExpiringCache> TtlCheckpointSaver<C> {
    pub fn new(cache: C, ttl: Duration) -> Self {
        Self {
            cache: Arc::new(cache),
            codec: Codec::default(),
            ttl,
            op_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Upper bound for every cache round trip
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    fn prefix(&self, key: &ThreadKey) -> Result<String> {
        if key.namespace.is_empty() {
            return Err(CheckpointError::configuration(
                "the ttl backend requires a non-empty namespace",
            ));
        }
        if key.namespace.contains(':') {
            return Err(CheckpointError::configuration(format!(
                "namespace `{}` must not contain ':'",
                key.namespace
            )));
        }
        Ok(keys::prefix(key))
    }

    async fn latest_id(&self, prefix: &str) -> Result<Option<u64>> {
        let pointer = with_timeout(
            BACKEND,
            IoKind::Read,
            self.op_timeout,
            self.cache.get(&keys::latest(prefix)),
        )
        .await?;

        pointer
            .map(|bytes| {
                keys::parse_id(&bytes).ok_or_else(|| {
                    CheckpointError::read(BACKEND, format!("corrupt latest pointer under {prefix}"))
                })
            })
            .transpose()
    }

    fn encode_writes(&self, writes: &[PendingWrite]) -> Result<Vec<Vec<u8>>> {
        writes.iter().map(|w| self.codec.dumps(w)).collect()
    }
}

#[async_trait]
impl<C: ExpiringCache> AsyncCheckpointSaver for TtlCheckpointSaver<C> {
    async fn setup(&self) -> Result<()> {
        with_timeout(BACKEND, IoKind::Setup, self.op_timeout, self.cache.ping()).await?;
        tracing::debug!(ttl = ?self.ttl, "ttl checkpoint cache reachable");
        Ok(())
    }

    async fn put_with_writes(
        &self,
        key: &ThreadKey,
        payload: serde_json::Value,
        parent_id: Option<CheckpointId>,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointId> {
        let prefix = self.prefix(key)?;
        let record = self.codec.dumps(&StoredCheckpoint {
            parent_id,
            written_at: Utc::now(),
            payload,
        })?;
        let writes = self.encode_writes(&writes)?;

        let seq = with_timeout(
            BACKEND,
            IoKind::Write,
            self.op_timeout,
            self.cache.append(&prefix, record, writes, self.ttl),
        )
        .await?;

        let id = CheckpointId::new(seq);
        tracing::debug!(thread = %key, checkpoint_id = %id, "stored expiring checkpoint");
        Ok(id)
    }

    async fn get_latest(&self, key: &ThreadKey) -> Result<Option<Checkpoint>> {
        let prefix = self.prefix(key)?;
        match self.latest_id(&prefix).await? {
            Some(id) => self.get(key, CheckpointId::new(id)).await,
            None => Ok(None),
        }
    }

    async fn get(&self, key: &ThreadKey, id: CheckpointId) -> Result<Option<Checkpoint>> {
        let prefix = self.prefix(key)?;
        let bytes = with_timeout(
            BACKEND,
            IoKind::Read,
            self.op_timeout,
            self.cache.get(&keys::record(&prefix, id.get())),
        )
        .await?;

        bytes
            .map(|bytes| decode_checkpoint(self.codec, key, id.get(), &bytes))
            .transpose()
    }

    async fn list(&self, key: &ThreadKey) -> Result<CheckpointStream> {
        let prefix = self.prefix(key)?;
        let latest = self.latest_id(&prefix).await?.unwrap_or(0);

        let cache = Arc::clone(&self.cache);
        let codec = self.codec;
        let op_timeout = self.op_timeout;
        let key = key.clone();

        let stream = async_stream::stream! {
            let mut next = 1u64;
            while next <= latest {
                let end = (next + PAGE_SIZE - 1).min(latest);
                let ids: Vec<u64> = (next..=end).collect();
                let page_keys: Vec<String> =
                    ids.iter().map(|id| keys::record(&prefix, *id)).collect();

                let values = match with_timeout(
                    BACKEND,
                    IoKind::Read,
                    op_timeout,
                    cache.get_many(&page_keys),
                )
                .await
                {
                    Ok(values) => values,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                // Records that expired since the pointer was read are skipped.
                for (id, value) in ids.into_iter().zip(values) {
                    if let Some(bytes) = value {
                        yield decode_checkpoint(codec, &key, id, &bytes);
                    }
                }
                next = end + 1;
            }
        };

        Ok(Box::pin(stream))
    }

    async fn put_writes(
        &self,
        key: &ThreadKey,
        id: CheckpointId,
        writes: Vec<PendingWrite>,
    ) -> Result<()> {
        let prefix = self.prefix(key)?;
        let values = self.encode_writes(&writes)?;

        let attached = with_timeout(
            BACKEND,
            IoKind::Write,
            self.op_timeout,
            self.cache.push_if_exists(
                &keys::record(&prefix, id.get()),
                &keys::writes(&prefix, id.get()),
                values,
            ),
        )
        .await?;

        if attached {
            Ok(())
        } else {
            Err(CheckpointError::write(
                BACKEND,
                format!("checkpoint {id} not found for {key}"),
            ))
        }
    }

    async fn get_writes(&self, key: &ThreadKey, id: CheckpointId) -> Result<Vec<PendingWrite>> {
        let prefix = self.prefix(key)?;
        let values = with_timeout(
            BACKEND,
            IoKind::Read,
            self.op_timeout,
            self.cache.list_range(&keys::writes(&prefix, id.get())),
        )
        .await?;

        values.iter().map(|bytes| self.codec.loads(bytes)).collect()
    }

    async fn delete_thread(&self, key: &ThreadKey) -> Result<()> {
        let prefix = self.prefix(key)?;
        with_timeout(
            BACKEND,
            IoKind::Write,
            self.op_timeout,
            self.cache.delete_log(&prefix),
        )
        .await
    }
}

impl<C: ExpiringCache> CheckpointBackend for TtlCheckpointSaver<C> {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::async_only(self.cache.durable(), true)
    }

    fn as_async(&self) -> Option<&dyn AsyncCheckpointSaver> {
        Some(self)
    }
}
