//! Checkpoint data model
//!
//! A [`Checkpoint`] is an immutable snapshot of one conversation thread at one
//! execution step. Checkpoints are addressed by a [`ThreadKey`] (namespace plus
//! thread id) and a per-thread [`CheckpointId`] sequence that starts at 1.
//!
//! [`PendingWrite`] records hang off a checkpoint and carry the field updates a
//! node produced without persisting a snapshot of its own.

use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace used when the caller does not pick one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Address of one conversation's checkpoint history
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadKey {
    pub namespace: String,
    pub thread_id: String,
}

impl ThreadKey {
    pub fn new(namespace: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            thread_id: thread_id.into(),
        }
    }

    /// Key in the [`DEFAULT_NAMESPACE`]
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE, thread_id)
    }

    /// Same thread id, different namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.thread_id)
    }
}

/// Monotonic checkpoint identifier, unique within one [`ThreadKey`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CheckpointId(u64);

impl CheckpointId {
    /// Id of the first checkpoint in every thread
    pub const FIRST: CheckpointId = CheckpointId(1);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id allocated after this one
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CheckpointId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<u64>().map(CheckpointId)
    }
}

impl From<u64> for CheckpointId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Persisted snapshot of workflow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub thread_id: String,
    pub namespace: String,
    /// Backend-independent serialized state
    pub payload: serde_json::Value,
    pub parent_id: Option<CheckpointId>,
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn key(&self) -> ThreadKey {
        ThreadKey::new(self.namespace.clone(), self.thread_id.clone())
    }

    /// Deserialize the payload into a concrete state type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(CheckpointError::from)
    }
}

/// Sub-step side effect attached to an existing checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Node or task that produced the write
    pub task_id: String,
    /// State field the write targets
    pub channel: String,
    pub value: serde_json::Value,
}

impl PendingWrite {
    pub fn new(
        task_id: impl Into<String>,
        channel: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            channel: channel.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_thread_key_display() {
        let key = ThreadKey::thread("t1");
        assert_eq!(key.namespace, DEFAULT_NAMESPACE);
        assert_eq!(key.to_string(), "default:t1");
        assert_eq!(key.with_namespace("staging").to_string(), "staging:t1");
    }

    #[test]
    fn test_checkpoint_id_ordering() {
        let first = CheckpointId::FIRST;
        let second = first.next();
        assert!(second > first);
        assert_eq!(second.get(), 2);
        assert_eq!("2".parse::<CheckpointId>().unwrap(), second);
    }

    #[test]
    fn test_checkpoint_id_serializes_as_number() {
        let encoded = serde_json::to_string(&CheckpointId::new(7)).unwrap();
        assert_eq!(encoded, "7");
    }

    #[test]
    fn test_decode_payload() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Snapshot {
            intent: String,
        }

        let checkpoint = Checkpoint {
            id: CheckpointId::FIRST,
            thread_id: "t1".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            payload: json!({"intent": "exercise"}),
            parent_id: None,
            written_at: Utc::now(),
        };

        let snapshot: Snapshot = checkpoint.decode().unwrap();
        assert_eq!(snapshot.intent, "exercise");
        assert_eq!(checkpoint.key(), ThreadKey::thread("t1"));
    }
}
