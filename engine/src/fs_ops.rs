//! Filesystem helpers shared by the pipeline stages.
//!
//! This module provides:
//! - Source tree enumeration in a stable, reproducible order
//! - Relative path rendering with `/` separators
//! - Marker and artifact writes with error context
//! - Human-readable sizes and durations for log lines

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use walkdir::WalkDir;

use crate::error::{EngineError, EngineResult};
use crate::model::FileRecord;

/// Result of one enumeration pass.
#[derive(Debug, Clone, Default)]
pub struct TreeListing {
    pub files: Vec<FileRecord>,
    pub total_bytes: u64,
}

/// Enumerate every regular file below `source`.
///
/// Entries are visited depth-first with siblings sorted by name, so the order
/// is the same for the same tree on every run. Symlinks are not followed.
pub fn enumerate_tree(source: &Path) -> EngineResult<TreeListing> {
    let mut listing = TreeListing::default();
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            EngineError::io("enumerate", path, io::Error::from(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|e| EngineError::io("stat", entry.path(), io::Error::from(e)))?;
        let relative_path = relative_string(source, entry.path());
        listing.total_bytes += metadata.len();
        listing.files.push(FileRecord {
            source_path: entry.path().to_path_buf(),
            relative_path,
            size: metadata.len(),
        });
    }
    Ok(listing)
}

/// Render `path` relative to `base` with `/` separators.
///
/// Falls back to the full path when `path` is not below `base`.
pub fn relative_string(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// First existing marker out of `names` directly below `dir`.
pub fn find_marker(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    names
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Write a UTF-8 text artifact, reporting the path on failure.
pub fn write_text(path: &Path, content: &str, operation: &'static str) -> EngineResult<()> {
    fs::write(path, content.as_bytes()).map_err(|e| EngineError::io(operation, path, e))
}

/// Create a directory and all its parents.
pub fn ensure_dir(path: &Path) -> EngineResult<()> {
    fs::create_dir_all(path).map_err(|e| EngineError::io("create directory", path, e))
}

/// Copy the bytes of `from` to `to`, then remove `from`.
pub fn relocate_file(from: &Path, to: &Path) -> EngineResult<()> {
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    fs::copy(from, to).map_err(|e| EngineError::io("relocate", to, e))?;
    fs::remove_file(from).map_err(|e| EngineError::io("remove", from, e))
}

/// Format a byte count with IEC units, e.g. `9.54 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }
    let mut size = bytes as f64;
    let mut unit_idx = 0;
    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }
    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Format an elapsed time as `H:MM:SS`.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
