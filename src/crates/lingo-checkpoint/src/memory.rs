//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointSaver`] keeps every thread's history in a process-local
//! map guarded by a [`parking_lot::RwLock`]. The lock is never held across an
//! `.await`, so the same instance serves blocking and async callers alike.
//!
//! # When to Use
//!
//! - Unit and integration tests (`clear()` gives each test a clean slate)
//! - Local development without a database
//! - The default backend when no durable store is configured
//!
//! Nothing survives a restart; use the SQLite or TTL-keyed backend when
//! conversations must outlive the process.
//!
//! # Example
//!
//! ```rust
//! use lingo_checkpoint::{CheckpointSaver, InMemoryCheckpointSaver, ThreadKey};
//! use serde_json::json;
//!
//! let saver = InMemoryCheckpointSaver::new();
//! let key = ThreadKey::thread("t1");
//!
//! let first = CheckpointSaver::put(&saver, &key, json!({"messages": []}), None).unwrap();
//! let second = CheckpointSaver::put(&saver, &key, json!({"messages": ["hi"]}), Some(first)).unwrap();
//!
//! let latest = saver.get_latest(&key).unwrap().unwrap();
//! assert_eq!(latest.id, second);
//! assert_eq!(latest.parent_id, Some(first));
//! ```

use crate::{
    checkpoint::{Checkpoint, CheckpointId, PendingWrite, ThreadKey},
    error::{CheckpointError, Result},
    traits::{
        AsyncCheckpointSaver, Capabilities, CheckpointBackend, CheckpointIter, CheckpointSaver,
        CheckpointStream,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct CheckpointEntry {
    checkpoint: Checkpoint,
    writes: Vec<PendingWrite>,
}

/// Volatile checkpoint store
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointSaver {
    storage: Arc<RwLock<HashMap<ThreadKey, Vec<CheckpointEntry>>>>,
}

impl InMemoryCheckpointSaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of threads being tracked
    pub fn thread_count(&self) -> usize {
        self.storage.read().len()
    }

    /// Get the total number of checkpoints across all threads
    pub fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Clear all checkpoints (useful for testing)
    pub fn clear(&self) {
        self.storage.write().clear();
    }

    fn find<R>(
        &self,
        key: &ThreadKey,
        id: CheckpointId,
        f: impl FnOnce(&CheckpointEntry) -> R,
    ) -> Option<R> {
        let storage = self.storage.read();
        storage
            .get(key)
            .and_then(|entries| entries.iter().find(|e| e.checkpoint.id == id))
            .map(f)
    }
}

impl CheckpointSaver for InMemoryCheckpointSaver {
    fn setup(&self) -> Result<()> {
        Ok(())
    }

    fn put_with_writes(
        &self,
        key: &ThreadKey,
        payload: serde_json::Value,
        parent_id: Option<CheckpointId>,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointId> {
        let mut storage = self.storage.write();
        let entries = storage.entry(key.clone()).or_default();

        // Entries are appended in id order, so the last one holds the maximum.
        let id = entries
            .last()
            .map(|e| e.checkpoint.id.next())
            .unwrap_or(CheckpointId::FIRST);

        entries.push(CheckpointEntry {
            checkpoint: Checkpoint {
                id,
                thread_id: key.thread_id.clone(),
                namespace: key.namespace.clone(),
                payload,
                parent_id,
                written_at: Utc::now(),
            },
            writes,
        });

        tracing::debug!(thread = %key, checkpoint_id = %id, "stored checkpoint");
        Ok(id)
    }

    fn get_latest(&self, key: &ThreadKey) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read();
        Ok(storage
            .get(key)
            .and_then(|entries| entries.last())
            .map(|e| e.checkpoint.clone()))
    }

    fn get(&self, key: &ThreadKey, id: CheckpointId) -> Result<Option<Checkpoint>> {
        Ok(self.find(key, id, |e| e.checkpoint.clone()))
    }

    fn list(&self, key: &ThreadKey) -> Result<CheckpointIter> {
        let snapshot: Vec<Checkpoint> = self
            .storage
            .read()
            .get(key)
            .map(|entries| entries.iter().map(|e| e.checkpoint.clone()).collect())
            .unwrap_or_default();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn put_writes(
        &self,
        key: &ThreadKey,
        id: CheckpointId,
        writes: Vec<PendingWrite>,
    ) -> Result<()> {
        let mut storage = self.storage.write();

        let entry = storage
            .get_mut(key)
            .and_then(|entries| entries.iter_mut().find(|e| e.checkpoint.id == id))
            .ok_or_else(|| {
                CheckpointError::write(BACKEND, format!("checkpoint {id} not found for {key}"))
            })?;

        entry.writes.extend(writes);
        Ok(())
    }

    fn get_writes(&self, key: &ThreadKey, id: CheckpointId) -> Result<Vec<PendingWrite>> {
        Ok(self
            .find(key, id, |e| e.writes.clone())
            .unwrap_or_default())
    }

    fn delete_thread(&self, key: &ThreadKey) -> Result<()> {
        self.storage.write().remove(key);
        Ok(())
    }
}

#[async_trait]
impl AsyncCheckpointSaver for InMemoryCheckpointSaver {
    async fn setup(&self) -> Result<()> {
        CheckpointSaver::setup(self)
    }

    async fn put_with_writes(
        &self,
        key: &ThreadKey,
        payload: serde_json::Value,
        parent_id: Option<CheckpointId>,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointId> {
        CheckpointSaver::put_with_writes(self, key, payload, parent_id, writes)
    }

    async fn get_latest(&self, key: &ThreadKey) -> Result<Option<Checkpoint>> {
        CheckpointSaver::get_latest(self, key)
    }

    async fn get(&self, key: &ThreadKey, id: CheckpointId) -> Result<Option<Checkpoint>> {
        CheckpointSaver::get(self, key, id)
    }

    async fn list(&self, key: &ThreadKey) -> Result<CheckpointStream> {
        let iter = CheckpointSaver::list(self, key)?;
        Ok(Box::pin(stream::iter(iter)))
    }

    async fn put_writes(
        &self,
        key: &ThreadKey,
        id: CheckpointId,
        writes: Vec<PendingWrite>,
    ) -> Result<()> {
        CheckpointSaver::put_writes(self, key, id, writes)
    }

    async fn get_writes(&self, key: &ThreadKey, id: CheckpointId) -> Result<Vec<PendingWrite>> {
        CheckpointSaver::get_writes(self, key, id)
    }

    async fn delete_thread(&self, key: &ThreadKey) -> Result<()> {
        CheckpointSaver::delete_thread(self, key)
    }
}

impl CheckpointBackend for InMemoryCheckpointSaver {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::both(false)
    }

    fn as_sync(&self) -> Option<&dyn CheckpointSaver> {
        Some(self)
    }

    fn as_async(&self) -> Option<&dyn AsyncCheckpointSaver> {
        Some(self)
    }
}
