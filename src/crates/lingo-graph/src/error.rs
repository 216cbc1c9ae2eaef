//! Error types for building and running the tutor workflow
//!
//! ```text
//! GraphError
//! ├── Configuration  - backend cannot serve the requested execution mode
//! ├── Validation     - graph structure errors found by compile()
//! ├── NodeExecution  - a node refused or failed to produce an update
//! ├── Checkpoint     - store failures, surfaced unmodified
//! │                    (store configuration errors become Configuration)
//! └── Serialization  - state could not be encoded or decoded
//! ```
//!
//! The engine never retries. A [`GraphError::Checkpoint`] wrapping a
//! retryable [`CheckpointError`] can be retried by the caller with the same
//! thread id and input; the previously committed checkpoint is untouched.

use lingo_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    /// Fatal misconfiguration detected before any node runs
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Graph validation error: {0}")]
    Validation(String),

    #[error("Node '{node}' failed: {reason}")]
    NodeExecution { node: String, reason: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CheckpointError> for GraphError {
    fn from(err: CheckpointError) -> Self {
        Self::from_store(err)
    }
}

impl GraphError {
    pub fn node(node: impl Into<String>, reason: impl ToString) -> Self {
        Self::NodeExecution {
            node: node.into(),
            reason: reason.to_string(),
        }
    }

    /// Lift a store error, promoting configuration failures so callers see
    /// one configuration variant regardless of where it was detected.
    pub(crate) fn from_store(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Configuration(msg) => Self::Configuration(msg),
            other => Self::Checkpoint(other),
        }
    }

    /// True when the failure came from a checkpoint write or read that may
    /// succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Checkpoint(e) if e.is_retryable())
    }
}
