//! # lingo-checkpoint - Resumable conversation state
//!
//! Checkpoint storage for the lingo tutor workflow. Every completed step of a
//! conversation is persisted as an immutable [`Checkpoint`] under a
//! [`ThreadKey`], so a later request on the same thread resumes from the newest
//! snapshot instead of starting empty.
//!
//! ## Backends
//!
//! | Backend                       | Call style     | Durable | Expiring |
//! |-------------------------------|----------------|---------|----------|
//! | [`InMemoryCheckpointSaver`]   | blocking+async | no      | no       |
//! | [`SqliteCheckpointSaver`]     | blocking       | yes     | no       |
//! | [`TtlCheckpointSaver`]        | async          | cache   | yes      |
//!
//! Each backend publishes a [`Capabilities`] descriptor through
//! [`CheckpointBackend`]. The workflow engine checks it once at compile time
//! and refuses a backend that cannot serve the caller's [`ExecutionMode`].
//!
//! ## Guarantees
//!
//! - Ids within a thread start at 1 and strictly increase; `get_latest`
//!   returns the maximum.
//! - A checkpoint and the pending writes committed with it become visible
//!   together or not at all.
//! - `setup()` is idempotent and never destroys data.
//! - Threads never see each other's history.
//! - The TTL-keyed backend forgets a whole thread once it has been idle for
//!   the configured TTL.
//!
//! ## Quick Start
//!
//! ```rust
//! use lingo_checkpoint::{StoreConfig, ThreadKey};
//! use serde_json::json;
//!
//! # fn main() -> lingo_checkpoint::Result<()> {
//! let backend = StoreConfig::sqlite("sqlite::memory:").open_backend()?;
//! let store = backend.as_sync().expect("sqlite is a blocking backend");
//! store.setup()?;
//!
//! let key = ThreadKey::thread("t1");
//! let id = store.put(&key, json!({"messages": []}), None)?;
//! assert_eq!(store.get_latest(&key)?.map(|c| c.id), Some(id));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`checkpoint`] - data model
//! - [`traits`] - store contracts and capabilities
//! - [`memory`], [`sqlite`], [`ttl`] - backends
//! - [`config`] - [`StoreConfig`] and backend construction
//! - [`serializer`] - byte codecs for the TTL-keyed backend
//! - [`error`] - [`CheckpointError`]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod sqlite;
mod timeout;
pub mod traits;
pub mod ttl;

pub use checkpoint::{Checkpoint, CheckpointId, PendingWrite, ThreadKey, DEFAULT_NAMESPACE};
pub use config::{BackendKind, StoreConfig, ENV_PREFIX};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{Codec, JsonSerializer, MsgPackSerializer, SerializerProtocol};
pub use sqlite::SqliteCheckpointSaver;
pub use traits::{
    AsyncCheckpointSaver, Capabilities, CheckpointBackend, CheckpointIter, CheckpointSaver,
    CheckpointStream, ExecutionMode,
};
pub use ttl::{ExpiringCache, InMemoryCache, TtlCheckpointSaver};
