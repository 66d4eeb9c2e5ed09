//! Error types for quorumkv.

use std::io;
use thiserror::Error;

/// Result type alias for quorumkv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage and replication operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// A table file is malformed.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Bad request parameters or keys, rejected before any work is done.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Fewer replicas than required acknowledged the operation.
    #[error("Quorum not reached: {acks} of {required} required acks")]
    QuorumNotReached { acks: usize, required: usize },

    /// A single replica call failed or returned an unexpected status.
    #[error("Replica {node} unavailable: {reason}")]
    ReplicaUnavailable { node: String, reason: String },

    /// The store has been closed.
    #[error("Store is closed")]
    StoreClosed,

    /// The data directory is locked by another process.
    #[error("Lock error: {0}")]
    LockError(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration<S: Into<String>>(msg: S) -> Self {
        Error::InvalidConfiguration(msg.into())
    }

    /// Create a replica failure for the given node.
    pub fn replica_unavailable(node: impl ToString, reason: impl ToString) -> Self {
        Error::ReplicaUnavailable {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error indicates a malformed table file.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Check if this error means the ack threshold was not met.
    pub fn is_quorum_failure(&self) -> bool {
        matches!(self, Error::QuorumNotReached { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad footer");
        assert_eq!(format!("{}", err), "Corruption detected: bad footer");

        let err = Error::QuorumNotReached {
            acks: 1,
            required: 2,
        };
        assert_eq!(format!("{}", err), "Quorum not reached: 1 of 2 required acks");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::corruption("x").is_corruption());
        assert!(!Error::StoreClosed.is_corruption());
        assert!(Error::QuorumNotReached {
            acks: 0,
            required: 1
        }
        .is_quorum_failure());
        assert!(!Error::invalid_argument("ack").is_quorum_failure());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing table");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(ref msg) if msg.contains("missing table")));
    }
}
