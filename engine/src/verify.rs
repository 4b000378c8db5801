//! Post-copy integrity verification.
//!
//! Compares the size of every captured source file with its counterpart at
//! the destination. Problems are accumulated, never raised one by one; the
//! caller decides what a non-clean report means for the batch.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};
use crate::model::{FileRecord, VerificationStatus};
use crate::progress::{CancelToken, ProgressCallback};

/// Status of every verified file, in verification order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    statuses: Vec<(String, VerificationStatus)>,
    index: HashMap<String, usize>,
    missing: usize,
    mismatched: usize,
}

impl VerificationReport {
    fn record(&mut self, relative_path: &str, status: VerificationStatus) {
        match status {
            VerificationStatus::Ok => {}
            VerificationStatus::Missing => self.missing += 1,
            VerificationStatus::SizeMismatch => self.mismatched += 1,
        }
        self.index.insert(relative_path.to_string(), self.statuses.len());
        self.statuses.push((relative_path.to_string(), status));
    }

    pub fn status(&self, relative_path: &str) -> Option<VerificationStatus> {
        self.index.get(relative_path).map(|&i| self.statuses[i].1)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn missing(&self) -> usize {
        self.missing
    }

    pub fn mismatched(&self) -> usize {
        self.mismatched
    }

    pub fn is_clean(&self) -> bool {
        self.missing == 0 && self.mismatched == 0
    }

    /// The `Integrity` error this report amounts to, if any.
    pub fn to_error(&self) -> Option<EngineError> {
        if self.is_clean() {
            None
        } else {
            Some(EngineError::Integrity {
                missing: self.missing,
                mismatched: self.mismatched,
            })
        }
    }
}

/// Checks a captured file list against one destination root.
pub struct IntegrityVerifier {
    destination_root: PathBuf,
    cancel: CancelToken,
}

impl IntegrityVerifier {
    pub fn new(destination_root: impl Into<PathBuf>, cancel: CancelToken) -> Self {
        IntegrityVerifier {
            destination_root: destination_root.into(),
            cancel,
        }
    }

    /// Classify every file of `files`.
    ///
    /// The cancellation token is checked before each file. Progress goes to
    /// `progress` as a transient percentage.
    pub fn verify(
        &self,
        files: &[FileRecord],
        progress: &dyn ProgressCallback,
    ) -> EngineResult<VerificationReport> {
        let mut report = VerificationReport::default();
        let total = files.len();
        for (done, file) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let status = self.check(file);
            if !status.is_ok() {
                tracing::debug!(file = %file.relative_path, ?status, "verification problem");
            }
            report.record(&file.relative_path, status);
            progress.on_transient(&format!("verifying {}%", (done + 1) * 100 / total));
        }
        Ok(report)
    }

    fn check(&self, file: &FileRecord) -> VerificationStatus {
        match fs::metadata(file.destination_path(&self.destination_root)) {
            Ok(metadata) if metadata.is_file() => {
                if metadata.len() == file.size {
                    VerificationStatus::Ok
                } else {
                    VerificationStatus::SizeMismatch
                }
            }
            _ => VerificationStatus::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_ops::enumerate_tree;
    use crate::progress::tests::RecordingProgress;
    use crate::progress::SilentProgress;
    use std::path::Path;

    fn mirrored(root: &Path) -> (Vec<FileRecord>, PathBuf) {
        let src = root.join("src");
        let dst = root.join("dst");
        for base in [&src, &dst] {
            fs::create_dir_all(base.join("sub")).expect("Failed to create dirs");
            fs::write(base.join("ten.bin"), [7u8; 10]).expect("Failed to write ten");
            fs::write(base.join("empty.bin"), b"").expect("Failed to write empty");
            fs::write(base.join("sub").join("big.bin"), [1u8; 500]).expect("Failed to write big");
        }
        (enumerate_tree(&src).expect("Failed to enumerate").files, dst)
    }

    #[test]
    fn test_identical_tree_is_clean() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (files, dst) = mirrored(temp_dir.path());
        let report = IntegrityVerifier::new(&dst, CancelToken::new())
            .verify(&files, &SilentProgress)
            .expect("verification should run");

        assert_eq!(report.len(), 3);
        assert!(report.is_clean());
        assert!(report.to_error().is_none());
        assert!(files
            .iter()
            .all(|f| report.status(&f.relative_path) == Some(VerificationStatus::Ok)));
    }

    #[test]
    fn test_problems_accumulate_without_stopping() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (files, dst) = mirrored(temp_dir.path());
        fs::remove_file(dst.join("empty.bin")).expect("Failed to remove");
        fs::write(dst.join("sub").join("big.bin"), [1u8; 499]).expect("Failed to truncate");

        let report = IntegrityVerifier::new(&dst, CancelToken::new())
            .verify(&files, &SilentProgress)
            .expect("verification should run");

        assert_eq!(report.status("empty.bin"), Some(VerificationStatus::Missing));
        assert_eq!(report.status("sub/big.bin"), Some(VerificationStatus::SizeMismatch));
        assert_eq!(report.status("ten.bin"), Some(VerificationStatus::Ok));
        assert_eq!((report.missing(), report.mismatched()), (1, 1));
        assert!(matches!(
            report.to_error(),
            Some(EngineError::Integrity { missing: 1, mismatched: 1 })
        ));
    }

    #[test]
    fn test_directory_in_place_of_file_is_missing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (files, dst) = mirrored(temp_dir.path());
        fs::remove_file(dst.join("ten.bin")).expect("Failed to remove");
        fs::create_dir(dst.join("ten.bin")).expect("Failed to create dir");

        let report = IntegrityVerifier::new(&dst, CancelToken::new())
            .verify(&files, &SilentProgress)
            .expect("verification should run");
        assert_eq!(report.status("ten.bin"), Some(VerificationStatus::Missing));
    }

    #[test]
    fn test_percentage_is_echoed_as_transient() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (files, dst) = mirrored(temp_dir.path());
        let progress = RecordingProgress::default();
        IntegrityVerifier::new(&dst, CancelToken::new())
            .verify(&files, &progress)
            .expect("verification should run");
        assert_eq!(progress.lines(), vec!["~verifying 33%", "~verifying 66%", "~verifying 100%"]);
    }

    #[test]
    fn test_cancelled_verification_stops() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (files, dst) = mirrored(temp_dir.path());
        let token = CancelToken::new();
        token.cancel();
        let result = IntegrityVerifier::new(&dst, token).verify(&files, &SilentProgress);
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
