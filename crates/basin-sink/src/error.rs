//! Sink Error Types
//!
//! The drain loop sorts failures into two buckets: storage-layer errors are
//! retryable from the failing state after a backoff, while worker-state
//! violations and configuration problems surface to the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    /// Storage, WAL, or record-writer failure. Retryable with backoff.
    #[error("Storage error: {0}")]
    Storage(#[from] basin_storage::Error),

    /// The upstream framework signaled an invalid worker state. Non-retryable.
    #[error("Illegal worker state: {0}")]
    IllegalWorkerState(String),

    /// Invalid or missing configuration. Surfaces at startup only.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Aggregated teardown failures from `close()`.
    #[error("Error closing sink writer: {0}")]
    Shutdown(String),
}

impl SinkError {
    /// Whether the per-partition pipeline may retry from its current state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Storage(_))
    }

    /// Whether recovery hit WAL fencing, meaning another writer owns the
    /// partition.
    pub fn is_fenced(&self) -> bool {
        matches!(self, SinkError::Storage(basin_storage::Error::WalFenced(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_retryable() {
        let err = SinkError::Storage(basin_storage::Error::Wal("append failed".to_string()));
        assert!(err.is_retryable());
        assert!(!err.is_fenced());
    }

    #[test]
    fn test_fenced_is_retryable_and_flagged() {
        let err = SinkError::Storage(basin_storage::Error::WalFenced("events-0".to_string()));
        assert!(err.is_retryable());
        assert!(err.is_fenced());
    }

    #[test]
    fn test_illegal_worker_state_is_not_retryable() {
        let err = SinkError::IllegalWorkerState("pausing unowned partition".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_storage_error() {
        fn inner() -> Result<()> {
            Err(basin_storage::Error::Serialization("bad".to_string()))?;
            Ok(())
        }
        assert!(matches!(inner(), Err(SinkError::Storage(_))));
    }
}
