//! Background content hashing.
//!
//! `ContentHasher` hashes a fixed file list on its own thread while the copy
//! tool runs in the foreground. The thread owns its inputs and hands its
//! results back through the join handle; nothing is shared mutably.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
use crate::error::{EngineError, EngineResult};
use crate::logging::RunLogger;
use crate::model::FileRecord;
use crate::progress::CancelToken;

/// Relative path -> digest, kept in the order the files were hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashResults {
    entries: Vec<(String, ChecksumValue)>,
    index: HashMap<String, usize>,
}

impl HashResults {
    pub fn from_pairs(pairs: Vec<(String, ChecksumValue)>) -> Self {
        let index = pairs
            .iter()
            .enumerate()
            .map(|(i, (path, _))| (path.clone(), i))
            .collect();
        HashResults { entries: pairs, index }
    }

    pub fn get(&self, relative_path: &str) -> Option<&ChecksumValue> {
        self.index.get(relative_path).map(|&i| &self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChecksumValue)> {
        self.entries.iter().map(|(path, value)| (path.as_str(), value))
    }
}

/// Hashes a captured file list on a background thread.
pub struct ContentHasher {
    files: Arc<Vec<FileRecord>>,
    algorithm: ChecksumAlgorithm,
    cancel: CancelToken,
    stop: Arc<AtomicBool>,
    logger: Option<Arc<RunLogger>>,
    handle: Option<JoinHandle<EngineResult<HashResults>>>,
    results: Option<EngineResult<HashResults>>,
}

impl ContentHasher {
    pub fn new(files: Vec<FileRecord>, algorithm: ChecksumAlgorithm, cancel: CancelToken) -> Self {
        ContentHasher {
            files: Arc::new(files),
            algorithm,
            cancel,
            stop: Arc::new(AtomicBool::new(false)),
            logger: None,
            handle: None,
            results: None,
        }
    }

    /// Log per-file progress to `logger` at debug level.
    pub fn with_logger(mut self, logger: Arc<RunLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Spawn the hashing thread. Calling `start` twice is a no-op.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.handle.is_some() || self.results.is_some() {
            return Ok(());
        }
        let files = Arc::clone(&self.files);
        let algorithm = self.algorithm;
        let cancel = self.cancel.clone();
        let stop = Arc::clone(&self.stop);
        let logger = self.logger.clone();
        let handle = thread::Builder::new()
            .name("content-hasher".to_string())
            .spawn(move || hash_all(&files, algorithm, &cancel, &stop, logger.as_deref()))
            .map_err(|e| EngineError::io("spawn hashing thread for", "content-hasher", e))?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the thread to stop at the next file boundary.
    pub fn abort(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Block until the thread is done and keep its outcome.
    pub fn join(&mut self) -> EngineResult<()> {
        if let Some(handle) = self.handle.take() {
            let outcome = handle.join().unwrap_or_else(|_| {
                Err(EngineError::HashingIncomplete { reason: "hashing thread panicked" })
            });
            self.results = Some(outcome);
        }
        match self.results.take() {
            Some(Ok(results)) => {
                self.results = Some(Ok(results));
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Err(EngineError::HashingIncomplete { reason: "hasher was never started" }),
        }
    }

    /// Digests, available only after a successful `join`.
    pub fn results(&self) -> Option<&HashResults> {
        match &self.results {
            Some(Ok(results)) => Some(results),
            _ => None,
        }
    }

    pub fn into_results(mut self) -> Option<HashResults> {
        match self.results.take() {
            Some(Ok(results)) => Some(results),
            _ => None,
        }
    }
}

impl Drop for ContentHasher {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.store(true, Ordering::SeqCst);
            let _ = handle.join();
        }
    }
}

fn hash_all(
    files: &[FileRecord],
    algorithm: ChecksumAlgorithm,
    cancel: &CancelToken,
    stop: &AtomicBool,
    logger: Option<&RunLogger>,
) -> EngineResult<HashResults> {
    let mut pairs = Vec::with_capacity(files.len());
    for file in files {
        if cancel.is_cancelled() || stop.load(Ordering::SeqCst) {
            return Err(EngineError::Cancelled);
        }
        let digest = compute_file_checksum(&file.source_path, algorithm)?;
        if let Some(logger) = logger {
            logger.debug(&format!("{} {}: {}", algorithm, file.relative_path, digest));
        }
        pairs.push((file.relative_path.clone(), digest));
    }
    Ok(HashResults::from_pairs(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::compute_checksum;
    use crate::fs_ops::enumerate_tree;
    use std::fs;

    fn sample_tree(root: &std::path::Path) -> Vec<FileRecord> {
        fs::create_dir_all(root.join("sub")).expect("Failed to create dirs");
        fs::write(root.join("a.txt"), b"alpha").expect("Failed to write a");
        fs::write(root.join("b.txt"), b"").expect("Failed to write b");
        fs::write(root.join("sub").join("c.txt"), b"gamma").expect("Failed to write c");
        enumerate_tree(root).expect("Failed to enumerate").files
    }

    #[test]
    fn test_results_cover_every_file_after_join() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let files = sample_tree(temp_dir.path());
        let mut hasher =
            ContentHasher::new(files.clone(), ChecksumAlgorithm::Md5, CancelToken::new());
        assert!(hasher.results().is_none());

        hasher.start().expect("Failed to start hasher");
        hasher.join().expect("Hashing should succeed");
        assert!(!hasher.is_running());

        let results = hasher.results().expect("results after join");
        assert_eq!(results.len(), files.len());
        assert_eq!(
            results.get("a.txt").map(ChecksumValue::hex),
            Some(compute_checksum(b"alpha", ChecksumAlgorithm::Md5).hex())
        );
        let order: Vec<_> = results.iter().map(|(p, _)| p).collect();
        assert_eq!(order, vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn test_digests_are_deterministic_across_runs() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let files = sample_tree(temp_dir.path());
        let run = || {
            let mut hasher =
                ContentHasher::new(files.clone(), ChecksumAlgorithm::Md5, CancelToken::new());
            hasher.start().expect("Failed to start hasher");
            hasher.join().expect("Hashing should succeed");
            hasher.into_results().expect("results")
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_unreadable_file_fails_the_whole_pass() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let files = sample_tree(temp_dir.path());
        fs::remove_file(temp_dir.path().join("b.txt")).expect("Failed to remove b");

        let mut hasher = ContentHasher::new(files, ChecksumAlgorithm::Md5, CancelToken::new());
        hasher.start().expect("Failed to start hasher");
        assert!(matches!(hasher.join(), Err(EngineError::Hashing { .. })));
        assert!(hasher.results().is_none());
    }

    #[test]
    fn test_cancelled_token_stops_hashing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let files = sample_tree(temp_dir.path());
        let token = CancelToken::new();
        token.cancel();

        let mut hasher = ContentHasher::new(files, ChecksumAlgorithm::Md5, token);
        hasher.start().expect("Failed to start hasher");
        assert!(matches!(hasher.join(), Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_join_without_start_is_an_error() {
        let mut hasher = ContentHasher::new(Vec::new(), ChecksumAlgorithm::Md5, CancelToken::new());
        let err = hasher.join().expect_err("join before start must fail");
        assert!(matches!(err, EngineError::HashingIncomplete { .. }));
        assert_eq!(err.kind(), crate::error::FailureKind::Hashing);
    }

    #[test]
    fn test_hash_results_lookup_is_by_relative_path() {
        let results = HashResults::from_pairs(vec![
            ("z.txt".to_string(), compute_checksum(b"z", ChecksumAlgorithm::Md5)),
            ("a.txt".to_string(), compute_checksum(b"a", ChecksumAlgorithm::Md5)),
        ]);
        assert_eq!(results.get("a.txt"), Some(&compute_checksum(b"a", ChecksumAlgorithm::Md5)));
        assert_eq!(results.get("missing.txt"), None);
    }
}
