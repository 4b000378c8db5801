//! Core data model for copy runs.
//!
//! This module defines the values that flow through the pipeline:
//! - SourceRequest: one directory the user asked to copy
//! - ValidationOutcome: what the path policy thinks of it
//! - FileRecord: one regular file captured during enumeration
//! - VerificationStatus: per-file result of the post-copy size check
//! - SourceFailure / BatchReport: the failure list handed back to the caller

use std::fmt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{EngineError, FailureKind};

/// A directory to copy plus the key of the destination root to copy into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub path: PathBuf,
    pub destination: String,
}

impl SourceRequest {
    pub fn new(path: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        SourceRequest {
            path: path.into(),
            destination: destination.into(),
        }
    }

    /// Final path component, used as case identifier and destination subdir name.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// Result of checking a source directory against the path policy.
///
/// Every rejection carries the offending path. `RejectedBlacklisted` is the
/// only advisory outcome; the tolerant setting lets processing continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    /// Path does not exist or is not a readable directory
    RejectedNotADirectory { path: PathBuf },
    /// Final component does not match the naming pattern
    RejectedName { path: PathBuf },
    /// A completion marker already sits directly under the directory
    RejectedTrigger { marker: PathBuf },
    /// A subtree entry exceeds the maximum path length
    RejectedPathTooLong { sub_path: String },
    /// A subtree entry matches a blacklist pattern
    RejectedBlacklisted { sub_path: String, pattern: String },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }

    /// True when the rejection may be overridden by the tolerant setting.
    pub fn is_advisory(&self) -> bool {
        matches!(self, ValidationOutcome::RejectedBlacklisted { .. })
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::RejectedNotADirectory { path } => {
                write!(f, "{} is not an accessible directory", path.display())
            }
            Self::RejectedName { path } => {
                write!(f, "{} does not match the required naming pattern", path.display())
            }
            Self::RejectedTrigger { marker } => {
                write!(
                    f,
                    "marker file {} is present, directory is already being processed",
                    marker.display()
                )
            }
            Self::RejectedPathTooLong { sub_path } => {
                write!(f, "path exceeds maximum length: {}", sub_path)
            }
            Self::RejectedBlacklisted { sub_path, pattern } => {
                write!(f, "path {} matches blacklist pattern {}", sub_path, pattern)
            }
        }
    }
}

/// A regular file captured while enumerating a source tree.
///
/// Hashes and verification results are correlated with records by
/// `relative_path`, never by position or identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute source path
    pub source_path: PathBuf,
    /// Path relative to the source root, `/`-separated
    pub relative_path: String,
    /// Size in bytes at enumeration time
    pub size: u64,
}

impl FileRecord {
    /// Where this file is expected to land under `destination_root`.
    pub fn destination_path(&self, destination_root: &Path) -> PathBuf {
        self.relative_path
            .split('/')
            .fold(destination_root.to_path_buf(), |acc, part| acc.join(part))
    }
}

/// Per-file outcome of the post-copy size check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationStatus {
    Ok,
    Missing,
    SizeMismatch,
}

impl VerificationStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, VerificationStatus::Ok)
    }
}

/// One recorded failure of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

impl SourceFailure {
    pub fn from_error(source: &Path, error: &EngineError) -> Self {
        SourceFailure {
            source: source.to_path_buf(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.source.display(), self.kind, self.message)
    }
}

/// Outcome of a whole batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Identifier shared by every log line and artifact of this run
    pub run_id: Uuid,
    /// Sources that reached the end of the pipeline (with or without failures)
    pub attempted: usize,
    /// Accumulated failures, in the order they were recorded
    pub failures: Vec<SourceFailure>,
    /// True when the batch stopped early because of a cancellation
    pub cancelled: bool,
}

impl BatchReport {
    pub fn new(run_id: Uuid) -> Self {
        BatchReport {
            run_id,
            attempted: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    pub fn had_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failures_for(&self, source: &Path) -> impl Iterator<Item = &SourceFailure> {
        let source = source.to_path_buf();
        self.failures.iter().filter(move |f| f.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_request_name_is_final_component() {
        let request = SourceRequest::new("/data/cases/123456-2024-S00001", "import");
        assert_eq!(request.name(), "123456-2024-S00001");
    }

    #[test]
    fn test_destination_path_joins_relative_components() {
        let record = FileRecord {
            source_path: PathBuf::from("/src/case/a/b.txt"),
            relative_path: "a/b.txt".to_string(),
            size: 3,
        };
        assert_eq!(
            record.destination_path(Path::new("/dst/case")),
            PathBuf::from("/dst/case").join("a").join("b.txt")
        );
    }

    #[test]
    fn test_only_blacklist_rejection_is_advisory() {
        let blacklisted = ValidationOutcome::RejectedBlacklisted {
            sub_path: "case/Help/HTML5".to_string(),
            pattern: "**/Help/HTML5*".to_string(),
        };
        assert!(blacklisted.is_advisory());
        assert!(!ValidationOutcome::RejectedName { path: PathBuf::from("x") }.is_advisory());
        assert!(ValidationOutcome::Accepted.is_accepted());
    }

    #[test]
    fn test_batch_report_filters_failures_by_source() {
        let mut report = BatchReport::new(Uuid::new_v4());
        assert!(!report.had_failures());
        report.failures.push(SourceFailure {
            source: PathBuf::from("/a"),
            kind: FailureKind::Process,
            message: "boom".to_string(),
        });
        assert!(report.had_failures());
        assert_eq!(report.failures_for(Path::new("/a")).count(), 1);
        assert_eq!(report.failures_for(Path::new("/b")).count(), 0);
    }
}
