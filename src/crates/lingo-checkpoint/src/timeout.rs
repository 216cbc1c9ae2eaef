//! Bounded backend I/O
//!
//! Every async round trip to a backend runs under [`with_timeout`], which turns
//! both driver failures and elapsed deadlines into the checkpoint error taxonomy.
//! Cancelling the future on timeout is safe because backends only publish a
//! checkpoint in their final atomic step.

use crate::error::CheckpointError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;

/// Which error class a failed operation maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoKind {
    Setup,
    Read,
    Write,
}

impl IoKind {
    pub(crate) fn error(self, backend: &'static str, reason: impl ToString) -> CheckpointError {
        match self {
            IoKind::Setup => CheckpointError::setup(backend, reason),
            IoKind::Read => CheckpointError::read(backend, reason),
            IoKind::Write => CheckpointError::write(backend, reason),
        }
    }
}

/// Run `operation` with a deadline, mapping failures by `kind`
pub(crate) async fn with_timeout<F, T, E>(
    backend: &'static str,
    kind: IoKind,
    duration: Duration,
    operation: F,
) -> crate::Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    match tokio_timeout(duration, operation).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(error)) => Err(kind.error(backend, error)),
        Err(_elapsed) => {
            tracing::warn!(backend, ?kind, ?duration, "backend operation timed out");
            Err(kind.error(
                backend,
                format!("operation timed out after {:?}", duration),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout("ttl", IoKind::Read, Duration::from_secs(1), async {
            Ok::<_, String>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_operation_failure_maps_to_kind() {
        let result = with_timeout("ttl", IoKind::Write, Duration::from_secs(1), async {
            Err::<(), _>("connection reset")
        })
        .await;
        assert!(matches!(result, Err(CheckpointError::Write { backend: "ttl", .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result = with_timeout("ttl", IoKind::Read, Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, String>(())
        })
        .await;

        match result {
            Err(CheckpointError::Read { reason, .. }) => assert!(reason.contains("timed out")),
            other => panic!("expected read timeout, got {other:?}"),
        }
    }
}
