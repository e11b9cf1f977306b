//! Error types and handling for Nimbus
//!
//! Every failure in the engine is one of the variants below. The engine uses
//! [`Error::is_retryable`] to drive low-level retries inside the transfer
//! primitive and [`Error::is_fatal`] to decide whether a run may be rerun at
//! all. Per-object errors are counted in the run statistics and the sync
//! continues; fatal errors stop scheduling immediately.

use crate::types::HashKind;

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O related errors
    Io,
    /// Object or directory missing
    NotFound,
    /// Permission or authentication failures
    Permission,
    /// Post-transfer verification failures
    Verify,
    /// Configuration errors
    Config,
    /// Command line usage errors
    Usage,
    /// Operation refused before it started
    Refused,
    /// Cancellation
    Cancelled,
    /// Timeout
    Timeout,
    /// Other errors
    Other,
}

/// Main error type for Nimbus operations
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Object not found
    #[error("object not found: {path}")]
    NotFound {
        /// Path of the missing object
        path: String,
    },

    /// Directory not found
    #[error("directory not found: {path}")]
    DirNotFound {
        /// Path of the missing directory
        path: String,
    },

    /// Object already exists
    #[error("object already exists: {path}")]
    AlreadyExists {
        /// Path of the conflicting object
        path: String,
    },

    /// Permission denied
    #[error("permission denied: {path}")]
    PermissionDenied {
        /// Path the backend refused access to
        path: String,
    },

    /// Post-transfer digest comparison failed
    #[error("{kind} hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Path of the transferred object
        path: String,
        /// Hash kind that was compared
        kind: HashKind,
        /// Digest reported by the source
        expected: String,
        /// Digest reported by the destination
        actual: String,
    },

    /// Post-transfer size comparison failed
    #[error("size mismatch for {path}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Path of the transferred object
        path: String,
        /// Size reported by the source
        expected: u64,
        /// Size reported by the destination
        actual: u64,
    },

    /// An immutable destination object would be modified
    #[error("immutable object would be modified: {path}")]
    ImmutableModified {
        /// Path of the immutable object
        path: String,
    },

    /// Source and destination overlap on the same backend
    #[error("source and destination overlap: {source_root} and {destination}")]
    OverlappingRemotes {
        /// Source root
        source_root: String,
        /// Destination root
        destination: String,
    },

    /// Deletions were skipped because earlier errors made them unsafe
    #[error("not deleting files as there were errors earlier in the run")]
    NotDeleting,

    /// The run finished with counted errors after all retries
    #[error("run finished with {count} errors")]
    RunErrors {
        /// Number of counted errors in the final attempt
        count: u64,
    },

    /// Operation not supported by the backend
    #[error("operation not supported: {operation}")]
    Unsupported {
        /// Name of the unsupported operation
        operation: String,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Command line usage error
    #[error("usage error: {message}")]
    Usage {
        /// Error message describing the incompatible options
        message: String,
    },

    /// Operation timed out
    #[error("operation timed out after {seconds} seconds")]
    Timeout {
        /// Number of seconds after which the operation timed out
        seconds: u64,
    },

    /// Operation cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::NotFound { .. } | Self::DirNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::Io,
            Self::PermissionDenied { .. } => ErrorKind::Permission,
            Self::HashMismatch { .. } | Self::SizeMismatch { .. } => ErrorKind::Verify,
            Self::ImmutableModified { .. } | Self::OverlappingRemotes { .. } => ErrorKind::Refused,
            Self::NotDeleting | Self::RunErrors { .. } => ErrorKind::Other,
            Self::Unsupported { .. } => ErrorKind::Other,
            Self::Config { .. } => ErrorKind::Config,
            Self::Usage { .. } => ErrorKind::Usage,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Check if the operation that produced this error is worth retrying
    ///
    /// Transient I/O failures, timeouts and verification mismatches are
    /// retryable; missing objects, permission failures and anything fatal
    /// are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. }
            | Self::Timeout { .. }
            | Self::HashMismatch { .. }
            | Self::SizeMismatch { .. }
            | Self::Other { .. } => true,
            Self::NotFound { .. }
            | Self::DirNotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::PermissionDenied { .. }
            | Self::Unsupported { .. }
            | Self::Cancelled
            | Self::NotDeleting
            | Self::RunErrors { .. } => false,
            _ => !self.is_fatal(),
        }
    }

    /// Check if this error must abort the whole run
    ///
    /// A fatal error stops the engine from scheduling new work and suppresses
    /// whole-run retries.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ImmutableModified { .. }
                | Self::OverlappingRemotes { .. }
                | Self::Config { .. }
                | Self::Usage { .. }
        )
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new usage error
    pub fn usage<S: Into<String>>(message: S) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create a new unsupported-operation error
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                path: error.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: error.to_string(),
            },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists {
                path: error.to_string(),
            },
            std::io::ErrorKind::TimedOut => Self::Timeout { seconds: 0 },
            _ => Self::Io {
                message: error.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::io("connection reset").is_retryable());
        assert!(Error::Timeout { seconds: 30 }.is_retryable());
        assert!(Error::HashMismatch {
            path: "a".into(),
            kind: HashKind::Blake3,
            expected: "00".into(),
            actual: "ff".into(),
        }
        .is_retryable());

        assert!(!Error::not_found("gone").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::PermissionDenied { path: "p".into() }.is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::ImmutableModified { path: "e".into() }.is_fatal());
        assert!(Error::OverlappingRemotes {
            source_root: "a".into(),
            destination: "a/b".into(),
        }
        .is_fatal());
        assert!(Error::usage("--no-traverse with deletions").is_fatal());
        assert!(!Error::io("flaky").is_fatal());
        assert!(!Error::NotDeleting.is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_retryable());

        let err: Error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.is_retryable());
    }
}
