//! Error types for checkpoint operations
//!
//! Every backend maps its driver errors into one [`CheckpointError`] taxonomy so that
//! the workflow engine can surface failures without knowing which store it talks to.
//! A missing checkpoint is never an error: lookups return `Ok(None)`.

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Missing or invalid connection info, or a capability mismatch.
    ///
    /// Fatal: retrying with the same configuration fails the same way.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Schema or connectivity bootstrap failed
    #[error("Setup failed for {backend} backend: {reason}")]
    Setup { backend: &'static str, reason: String },

    /// Checkpoint persistence failed; nothing was committed
    #[error("Write failed on {backend} backend: {reason}")]
    Write { backend: &'static str, reason: String },

    /// Checkpoint retrieval failed
    #[error("Read failed on {backend} backend: {reason}")]
    Read { backend: &'static str, reason: String },

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// MessagePack encoding error
    #[error("Binary encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error
    #[error("Binary decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl CheckpointError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn setup(backend: &'static str, reason: impl ToString) -> Self {
        Self::Setup {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn write(backend: &'static str, reason: impl ToString) -> Self {
        Self::Write {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn read(backend: &'static str, reason: impl ToString) -> Self {
        Self::Read {
            backend,
            reason: reason.to_string(),
        }
    }

    /// Whether a caller may retry the same operation with the same inputs.
    ///
    /// Only I/O failures qualify. A retried `put` allocates a fresh id, so it
    /// can never collide with a checkpoint that was already committed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::Read { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CheckpointError::write("memory", "boom").is_retryable());
        assert!(CheckpointError::read("memory", "boom").is_retryable());
        assert!(!CheckpointError::configuration("no url").is_retryable());
        assert!(!CheckpointError::setup("sqlite", "denied").is_retryable());
    }

    #[test]
    fn test_display_names_backend() {
        let err = CheckpointError::setup("sqlite", "unable to open database file");
        assert_eq!(
            err.to_string(),
            "Setup failed for sqlite backend: unable to open database file"
        );
    }
}
