//! Storage Error Types
//!
//! All storage, WAL, and record-writer failures funnel into [`Error`]. The
//! sink's drain loop treats every variant as retryable from the failing state
//! except WAL fencing, which means another writer holds the partition.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL error: {0}")]
    Wal(String),

    #[error("WAL fenced: {0}")]
    WalFenced(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported implementation: {0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_message() {
        let err = Error::Wal("truncate failed".to_string());
        assert!(format!("{}", err).contains("truncate failed"));

        let err = Error::WalFenced("events-0 already has a writer".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("WAL fenced"));
        assert!(msg.contains("events-0"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_question_mark_propagation() {
        fn inner() -> Result<()> {
            Err(Error::Serialization("bad record".to_string()))?;
            Ok(())
        }
        assert!(inner().is_err());
    }
}
