//! Checkpoint store contract and backend capability negotiation
//!
//! This module defines the two call-style contracts every backend can implement,
//! plus the [`CheckpointBackend`] handle that tells the workflow engine which of
//! them a backend actually provides.
//!
//! # Overview
//!
//! - [`CheckpointSaver`] - blocking contract, called directly from the caller's thread
//! - [`AsyncCheckpointSaver`] - non-blocking contract, suspends at I/O boundaries
//! - [`CheckpointBackend`] - type-erased handle with a [`Capabilities`] descriptor
//! - [`CheckpointIter`] / [`CheckpointStream`] - lazy, oldest-first history readers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Workflow engine                                             │
//! │    compile(): backend.require(ExecutionMode::Async)?         │
//! │    ainvoke(): backend.as_async()?.put_with_writes(..).await  │
//! │    invoke():  backend.as_sync()?.put_with_writes(..)         │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ Arc<dyn CheckpointBackend>
//!                             ↓
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Backend            sync   async   durable   expiring        │
//! │  memory              ✓       ✓                               │
//! │  sqlite              ✓               ✓                       │
//! │  ttl                         ✓       ✓          ✓            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capability checks happen once, when the engine is compiled. A backend that
//! lacks the requested call style is rejected with
//! [`CheckpointError::Configuration`] before any node runs; there is no
//! fallback that quietly blocks inside an async caller.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use lingo_checkpoint::*;
//!
//! struct FileSaver { /* ... */ }
//!
//! impl CheckpointSaver for FileSaver {
//!     fn setup(&self) -> Result<()> { /* create directory */ Ok(()) }
//!     fn put_with_writes(
//!         &self,
//!         key: &ThreadKey,
//!         payload: serde_json::Value,
//!         parent_id: Option<CheckpointId>,
//!         writes: Vec<PendingWrite>,
//!     ) -> Result<CheckpointId> {
//!         // allocate max + 1, write snapshot and writes atomically
//!         # unimplemented!()
//!     }
//!     // ... remaining methods ...
//! }
//!
//! impl CheckpointBackend for FileSaver {
//!     fn name(&self) -> &'static str { "file" }
//!     fn capabilities(&self) -> Capabilities { Capabilities::sync_only(true) }
//!     fn as_sync(&self) -> Option<&dyn CheckpointSaver> { Some(self) }
//! }
//! ```

use crate::checkpoint::{Checkpoint, CheckpointId, PendingWrite, ThreadKey};
use crate::error::{CheckpointError, Result};
use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

/// Lazy, oldest-first checkpoint history for blocking callers
pub type CheckpointIter = Box<dyn Iterator<Item = Result<Checkpoint>> + Send + 'static>;

/// Lazy, oldest-first checkpoint history for async callers
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<Checkpoint>> + Send + 'static>>;

/// Call style a caller needs from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// The caller blocks on every store operation
    Blocking,
    /// The caller runs inside an async executor and must not block it
    Async,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Blocking => f.write_str("blocking"),
            ExecutionMode::Async => f.write_str("async"),
        }
    }
}

/// What a backend can do, queried at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_sync: bool,
    pub supports_async: bool,
    /// Survives a process restart
    pub durable: bool,
    /// May drop checkpoints once their TTL elapses
    pub expiring: bool,
}

impl Capabilities {
    pub const fn sync_only(durable: bool) -> Self {
        Self {
            supports_sync: true,
            supports_async: false,
            durable,
            expiring: false,
        }
    }

    pub const fn async_only(durable: bool, expiring: bool) -> Self {
        Self {
            supports_sync: false,
            supports_async: true,
            durable,
            expiring,
        }
    }

    pub const fn both(durable: bool) -> Self {
        Self {
            supports_sync: true,
            supports_async: true,
            durable,
            expiring: false,
        }
    }

    pub const fn supports(&self, mode: ExecutionMode) -> bool {
        match mode {
            ExecutionMode::Blocking => self.supports_sync,
            ExecutionMode::Async => self.supports_async,
        }
    }
}

/// Blocking checkpoint store contract
///
/// All methods may be called concurrently from many threads; implementations
/// synchronize internally. Lookups that find nothing return `Ok(None)`.
pub trait CheckpointSaver: Send + Sync {
    /// Provision tables or verify connectivity. Idempotent and non-destructive.
    fn setup(&self) -> Result<()>;

    /// Persist a new snapshot together with its pending writes, atomically.
    ///
    /// Allocates the next id for `key`; never overwrites an existing checkpoint.
    fn put_with_writes(
        &self,
        key: &ThreadKey,
        payload: serde_json::Value,
        parent_id: Option<CheckpointId>,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointId>;

    /// Persist a new snapshot
    fn put(
        &self,
        key: &ThreadKey,
        payload: serde_json::Value,
        parent_id: Option<CheckpointId>,
    ) -> Result<CheckpointId> {
        self.put_with_writes(key, payload, parent_id, Vec::new())
    }

    /// Snapshot with the greatest id for `key`
    fn get_latest(&self, key: &ThreadKey) -> Result<Option<Checkpoint>>;

    /// Specific historical snapshot
    fn get(&self, key: &ThreadKey, id: CheckpointId) -> Result<Option<Checkpoint>>;

    /// Full history, oldest first
    fn list(&self, key: &ThreadKey) -> Result<CheckpointIter>;

    /// Attach writes to an existing checkpoint; fails with a write error if
    /// the checkpoint does not exist.
    fn put_writes(&self, key: &ThreadKey, id: CheckpointId, writes: Vec<PendingWrite>)
        -> Result<()>;

    /// Writes attached to a checkpoint, in write order
    fn get_writes(&self, key: &ThreadKey, id: CheckpointId) -> Result<Vec<PendingWrite>>;

    /// Remove a thread's whole history
    fn delete_thread(&self, key: &ThreadKey) -> Result<()>;
}

/// Non-blocking checkpoint store contract
///
/// Same semantics as [`CheckpointSaver`]; every operation may suspend at I/O.
#[async_trait]
pub trait AsyncCheckpointSaver: Send + Sync {
    async fn setup(&self) -> Result<()>;

    async fn put_with_writes(
        &self,
        key: &ThreadKey,
        payload: serde_json::Value,
        parent_id: Option<CheckpointId>,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointId>;

    async fn put(
        &self,
        key: &ThreadKey,
        payload: serde_json::Value,
        parent_id: Option<CheckpointId>,
    ) -> Result<CheckpointId> {
        self.put_with_writes(key, payload, parent_id, Vec::new()).await
    }

    async fn get_latest(&self, key: &ThreadKey) -> Result<Option<Checkpoint>>;

    async fn get(&self, key: &ThreadKey, id: CheckpointId) -> Result<Option<Checkpoint>>;

    /// Stream the history, oldest first. The stream is not restartable; call
    /// again to re-read from the backend.
    async fn list(&self, key: &ThreadKey) -> Result<CheckpointStream>;

    async fn put_writes(
        &self,
        key: &ThreadKey,
        id: CheckpointId,
        writes: Vec<PendingWrite>,
    ) -> Result<()>;

    async fn get_writes(&self, key: &ThreadKey, id: CheckpointId) -> Result<Vec<PendingWrite>>;

    async fn delete_thread(&self, key: &ThreadKey) -> Result<()>;
}

/// Type-erased backend handle shared by every execution in the process
pub trait CheckpointBackend: Send + Sync {
    /// Short backend name used in errors and logs
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Blocking view, present iff `capabilities().supports_sync`
    fn as_sync(&self) -> Option<&dyn CheckpointSaver> {
        None
    }

    /// Async view, present iff `capabilities().supports_async`
    fn as_async(&self) -> Option<&dyn AsyncCheckpointSaver> {
        None
    }

    /// Fail with a configuration error unless `mode` is supported
    fn require(&self, mode: ExecutionMode) -> Result<()> {
        let available = match mode {
            ExecutionMode::Blocking => self.as_sync().is_some(),
            ExecutionMode::Async => self.as_async().is_some(),
        };
        if self.capabilities().supports(mode) && available {
            return Ok(());
        }

        let alternative = match mode {
            ExecutionMode::Blocking => "memory or sqlite",
            ExecutionMode::Async => "memory or ttl",
        };
        tracing::warn!(backend = self.name(), %mode, "backend rejected for execution mode");
        Err(CheckpointError::configuration(format!(
            "the {} backend does not support {} execution; select the {} backend instead",
            self.name(),
            mode,
            alternative
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoViews;

    impl CheckpointBackend for NoViews {
        fn name(&self) -> &'static str {
            "none"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::both(false)
        }
    }

    #[test]
    fn test_capabilities_supports() {
        let caps = Capabilities::sync_only(true);
        assert!(caps.supports(ExecutionMode::Blocking));
        assert!(!caps.supports(ExecutionMode::Async));

        let caps = Capabilities::async_only(true, true);
        assert!(!caps.supports(ExecutionMode::Blocking));
        assert!(caps.supports(ExecutionMode::Async));
    }

    #[test]
    fn test_require_checks_views_not_just_flags() {
        let err = NoViews.require(ExecutionMode::Async).unwrap_err();
        assert!(matches!(err, CheckpointError::Configuration(_)));
    }
}
