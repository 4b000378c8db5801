//! Error types for the copy pipeline.
//!
//! `EngineError` covers every failure a single source can run into, from a
//! rejected directory name to a crashed audit log. Failures are caught at the
//! orchestrator's per-source boundary and recorded as `SourceFailure` entries;
//! hashing failures, audit log failures and `Cancelled` also stop the batch.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::ValidationOutcome;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while validating, copying, verifying or reporting a source.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source rejected by the path policy before any I/O started
    #[error("{outcome}")]
    Validation {
        path: PathBuf,
        outcome: ValidationOutcome,
    },

    /// Destination slot already carries a completion marker
    #[error("destination is blocked by marker {}", marker.display())]
    DestinationBlocked { marker: PathBuf },

    /// Destination exists but is not a directory
    #[error("destination {} exists and is not a directory", path.display())]
    DestinationNotADirectory { path: PathBuf },

    /// External copy tool reported an unrecoverable problem (exit code > 5)
    #[error("copy tool failed with return code {code} ({description})")]
    Process { code: i32, description: &'static str },

    /// Files missing or with wrong size at the destination after the copy
    #[error("integrity check failed: {missing} missing file(s), {mismatched} size mismatch(es)")]
    Integrity { missing: usize, mismatched: usize },

    /// Filesystem operation failed
    #[error("failed to {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A file could not be read while computing its digest
    #[error("failed to hash {}: {source}", path.display())]
    Hashing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The background hasher ended without producing its digests
    #[error("hashing did not complete: {reason}")]
    HashingIncomplete { reason: &'static str },

    /// The copy tool could not be started or probed
    #[error("copy tool {program} is not available: {source}")]
    ToolUnavailable {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Configuration or settings could not be loaded
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A mandatory log sink could not be opened
    #[error("unable to open log {}: {source}", path.display())]
    LoggingInit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An open audit log stopped accepting records
    #[error("unable to write log {}: {source}", path.display())]
    LogWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The user asked to stop the run
    #[error("run cancelled by user")]
    Cancelled,
}

/// Coarse failure category reported to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Process,
    Integrity,
    Io,
    Hashing,
    Config,
    Cancelled,
    LoggingInit,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Validation => "validation",
            FailureKind::Process => "process",
            FailureKind::Integrity => "integrity",
            FailureKind::Io => "io",
            FailureKind::Hashing => "hashing",
            FailureKind::Config => "config",
            FailureKind::Cancelled => "cancelled",
            FailureKind::LoggingInit => "logging",
        };
        f.write_str(name)
    }
}

impl EngineError {
    /// Wrap an I/O error with the operation and path that produced it.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        EngineError::Config {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation { .. } => FailureKind::Validation,
            Self::Process { .. } => FailureKind::Process,
            Self::Integrity { .. } => FailureKind::Integrity,
            Self::Io { .. }
            | Self::DestinationBlocked { .. }
            | Self::DestinationNotADirectory { .. } => FailureKind::Io,
            Self::Hashing { .. } | Self::HashingIncomplete { .. } => FailureKind::Hashing,
            Self::ToolUnavailable { .. } | Self::Config { .. } => FailureKind::Config,
            Self::Cancelled => FailureKind::Cancelled,
            Self::LoggingInit { .. } | Self::LogWrite { .. } => FailureKind::LoggingInit,
        }
    }

    /// True for errors that must stop the whole batch rather than one source.
    ///
    /// An unreadable source file leaves the tree in an unknown state, so the
    /// remaining sources are not attempted.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::LoggingInit { .. }
                | Self::LogWrite { .. }
                | Self::Hashing { .. }
                | Self::HashingIncomplete { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_logging_and_hashing_are_batch_fatal() {
        assert!(EngineError::Cancelled.is_batch_fatal());
        assert!(EngineError::Hashing {
            path: PathBuf::from("case/a.bin"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
        .is_batch_fatal());
        let incomplete = EngineError::HashingIncomplete { reason: "hasher was never started" };
        assert!(incomplete.is_batch_fatal());
        assert_eq!(incomplete.kind(), FailureKind::Hashing);
        assert!(EngineError::LoggingInit {
            path: PathBuf::from("log.txt"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
        .is_batch_fatal());
        assert!(!EngineError::Process { code: 8, description: "x" }.is_batch_fatal());
        assert!(!EngineError::Integrity { missing: 1, mismatched: 0 }.is_batch_fatal());
        assert!(!EngineError::config("bad key").is_batch_fatal());
    }

    #[test]
    fn test_io_error_message_names_operation_and_path() {
        let err = EngineError::io(
            "write manifest",
            "/tmp/out.tsv",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        let msg = err.to_string();
        assert!(msg.contains("write manifest"));
        assert!(msg.contains("/tmp/out.tsv"));
        assert_eq!(err.kind(), FailureKind::Io);
    }
}
