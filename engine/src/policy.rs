//! Source path policy and destination slot creation.
//!
//! Checks run cheapest-first: a missing directory or a bad name is reported
//! before the subtree is scanned for over-long or blacklisted paths.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::fs_ops;
use crate::model::ValidationOutcome;

/// Compiled naming, length, blacklist and marker rules.
#[derive(Debug)]
pub struct PathPolicy {
    name_pattern: Regex,
    max_path_length: usize,
    blacklist: GlobSet,
    blacklist_patterns: Vec<String>,
    blocking_markers: Vec<String>,
}

impl PathPolicy {
    pub fn new(config: &Config) -> EngineResult<Self> {
        let name_pattern = Regex::new(&config.dir_regex)
            .map_err(|e| EngineError::config(format!("dir_regex {:?}: {}", config.dir_regex, e)))?;
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.blacklist {
            let glob = Glob::new(pattern).map_err(|e| {
                EngineError::config(format!("blacklist pattern {:?}: {}", pattern, e))
            })?;
            builder.add(glob);
        }
        let blacklist = builder
            .build()
            .map_err(|e| EngineError::config(format!("blacklist: {}", e)))?;
        Ok(PathPolicy {
            name_pattern,
            max_path_length: config.max_path_length,
            blacklist,
            blacklist_patterns: config.blacklist.clone(),
            blocking_markers: config.blocking_markers().into_iter().map(str::to_string).collect(),
        })
    }

    fn markers(&self) -> Vec<&str> {
        self.blocking_markers.iter().map(String::as_str).collect()
    }

    /// Check a candidate source directory.
    ///
    /// Sub-paths in the outcome are rendered relative to the directory's
    /// parent (`<name>/<relative path>`), which is also the form measured
    /// against the maximum length and matched against the blacklist.
    pub fn validate(&self, path: &Path) -> ValidationOutcome {
        let resolved = match fs::canonicalize(path) {
            Ok(resolved) if resolved.is_dir() && fs::read_dir(&resolved).is_ok() => resolved,
            _ => {
                return ValidationOutcome::RejectedNotADirectory {
                    path: path.to_path_buf(),
                }
            }
        };

        let name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !self.name_pattern.is_match(&name) {
            return ValidationOutcome::RejectedName { path: resolved };
        }

        if let Some(outcome) = self.scan_subtree(&resolved, &name) {
            return outcome;
        }

        if let Some(marker) = fs_ops::find_marker(&resolved, &self.markers()) {
            return ValidationOutcome::RejectedTrigger { marker };
        }

        debug!(path = %resolved.display(), "source accepted by path policy");
        ValidationOutcome::Accepted
    }

    /// One walk over the subtree. A length violation outranks a blacklist hit,
    /// so the walk only stops early once one is found.
    fn scan_subtree(&self, root: &Path, name: &str) -> Option<ValidationOutcome> {
        let mut blacklisted: Option<ValidationOutcome> = None;
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let Ok(entry) = entry else {
                continue;
            };
            let sub_path = format!("{}/{}", name, fs_ops::relative_string(root, entry.path()));
            if sub_path.chars().count() > self.max_path_length {
                return Some(ValidationOutcome::RejectedPathTooLong { sub_path });
            }
            if blacklisted.is_none() {
                if let Some(index) = self.blacklist.matches(&sub_path).first() {
                    blacklisted = Some(ValidationOutcome::RejectedBlacklisted {
                        pattern: self.blacklist_patterns[*index].clone(),
                        sub_path,
                    });
                }
            }
        }
        blacklisted
    }

    /// Create or reuse the destination slot for `source` under `destination_root`.
    ///
    /// Fails when the slot already holds a blocking marker: another run, or a
    /// completed earlier run, owns it. Existing markers are never touched.
    pub fn mk_destination(&self, source: &Path, destination_root: &Path) -> EngineResult<PathBuf> {
        let name = source.file_name().ok_or_else(|| EngineError::Validation {
            path: source.to_path_buf(),
            outcome: ValidationOutcome::RejectedName {
                path: source.to_path_buf(),
            },
        })?;
        let destination = destination_root.join(name);
        if destination.is_dir() {
            if let Some(marker) = fs_ops::find_marker(&destination, &self.markers()) {
                return Err(EngineError::DestinationBlocked { marker });
            }
        } else if destination.exists() {
            return Err(EngineError::DestinationNotADirectory { path: destination });
        } else {
            fs_ops::ensure_dir(&destination)?;
        }
        Ok(destination)
    }
}
