//! Run configuration and state snapshots

use crate::state::ConversationState;
use chrono::{DateTime, Utc};
use lingo_checkpoint::{CheckpointId, PendingWrite};

/// Addresses one invocation to a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub thread_id: String,
    /// Overrides the workflow's namespace for this run
    pub namespace: Option<String>,
}

impl RunConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Decoded state at one checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub checkpoint_id: CheckpointId,
    pub parent_id: Option<CheckpointId>,
    pub written_at: DateTime<Utc>,
    pub state: ConversationState,
    /// Updates from transient nodes committed with this checkpoint
    pub writes: Vec<PendingWrite>,
}
