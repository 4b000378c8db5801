//! # Cirdan Engine - Verified Bulk Copy
//!
//! Headless library behind the `cirdan` command line tool. It copies case
//! directories to a configured destination with an external mirroring tool
//! (robocopy), hashes every file while the copy runs, checks the result at
//! the destination and leaves an audit trail that survives partial failure.
//!
//! ## Overview
//!
//! For every requested source directory the engine:
//! - Validates the directory name, path lengths and blacklist patterns
//! - Opens a per-source audit log under the shared log root
//! - Copies the tree with the external tool while hashing in the background
//! - Verifies file sizes at the destination
//! - Writes a TSV manifest next to the audit log and into the destination
//! - Writes completion and quality-check markers plus a mail-relay drop file
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use engine::{Config, RoboCopy, RunLogger, RunSettings, SourceRequest, TransferOrchestrator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(Path::new("config.json"))?;
//! let settings = RunSettings::load(Path::new("settings.json"), &config)?;
//! let logger = Arc::new(RunLogger::from_config(&config)?);
//! let tool = RoboCopy::detect(&config.copy_tool)?;
//!
//! let orchestrator =
//!     TransferOrchestrator::new(config, settings.clone(), logger, Box::new(tool))?;
//! let request = SourceRequest::new("D:\\cases\\123456-2024-S00001", &settings.destination);
//! let report = orchestrator.run(&[request])?;
//! for failure in &report.failures {
//!     println!("{}", failure);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Requests, validation outcomes, file records, batch report
//! - **error**: Error taxonomy and batch-fatal classification
//! - **config**: Site configuration and per-user run settings
//! - **policy**: Source validation and destination slots
//! - **checksums**: Digest algorithms
//! - **hasher**: Background content hashing
//! - **copy_tool**: External copy tool supervision
//! - **verify**: Post-copy size verification
//! - **manifest**: TSV manifest building and persistence
//! - **notify**: Mail-relay drop files
//! - **logging**: Process, remote and user audit logs
//! - **fs_ops**: Tree enumeration and small filesystem helpers
//! - **progress**: Echo callbacks and cancellation
//! - **job**: Batch orchestration

pub mod model;
pub mod error;
pub mod config;
pub mod checksums;
pub mod hasher;
pub mod policy;
pub mod copy_tool;
pub mod verify;
pub mod manifest;
pub mod notify;
pub mod logging;
pub mod fs_ops;
pub mod progress;
pub mod job;

// Re-export main types and functions
pub use model::{
    BatchReport, FileRecord, SourceFailure, SourceRequest, ValidationOutcome, VerificationStatus,
};
pub use error::{EngineError, EngineResult, FailureKind};
pub use config::{Config, ManifestLabels, NotificationConfig, RunSettings};
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use hasher::{ContentHasher, HashResults};
pub use policy::PathPolicy;
pub use copy_tool::{CopyRun, CopyTool, RoboCopy};
pub use verify::{IntegrityVerifier, VerificationReport};
pub use manifest::Manifest;
pub use logging::RunLogger;
pub use progress::{CancelToken, ProgressCallback, SilentProgress};
pub use job::TransferOrchestrator;
