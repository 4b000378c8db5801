//! Batch orchestration.
//!
//! `TransferOrchestrator::run` takes every requested source through the
//! pipeline, one source at a time:
//! - validate the source and open its remote log
//! - enumerate the tree and start hashing in the background
//! - run the copy tool, then verify sizes at the destination
//! - persist the manifest, then write markers and the notification
//!
//! Per-source failures are recorded in the `BatchReport` and the batch moves
//! on. A cancellation, an unreadable source file or a failed audit log stops
//! it; the audit log case also takes the crash path.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::{Config, RunSettings};
use crate::copy_tool::{self, CopyTool};
use crate::error::{EngineError, EngineResult, FailureKind};
use crate::fs_ops;
use crate::hasher::ContentHasher;
use crate::logging::{run_timestamp, RunLogger};
use crate::manifest::Manifest;
use crate::model::{BatchReport, FileRecord, SourceFailure, SourceRequest, VerificationStatus};
use crate::notify::Notification;
use crate::policy::PathPolicy;
use crate::progress::{CancelToken, ProgressCallback, SilentProgress};
use crate::verify::{IntegrityVerifier, VerificationReport};

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Drives a batch of sources through the copy, verify and report pipeline.
pub struct TransferOrchestrator {
    config: Config,
    settings: RunSettings,
    policy: PathPolicy,
    logger: Arc<RunLogger>,
    tool: Box<dyn CopyTool>,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancelToken,
    spinner_interval: Duration,
}

impl TransferOrchestrator {
    pub fn new(
        config: Config,
        settings: RunSettings,
        logger: Arc<RunLogger>,
        tool: Box<dyn CopyTool>,
    ) -> EngineResult<Self> {
        let policy = PathPolicy::new(&config)?;
        Ok(TransferOrchestrator {
            config,
            settings,
            policy,
            logger,
            tool,
            progress: Arc::new(SilentProgress),
            cancel: CancelToken::new(),
            spinner_interval: Duration::from_millis(250),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the batch at the next checkpoint.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Process every request in order.
    ///
    /// Returns the accumulated report. A remote log that cannot be opened or
    /// written sends the run down the crash path and is returned as an error.
    /// Other batch-fatal failures are recorded and end the batch early.
    pub fn run(&self, requests: &[SourceRequest]) -> EngineResult<BatchReport> {
        let mut report = BatchReport::new(Uuid::new_v4());
        self.logger.info(&format!(
            "run {} started: {} source(s), destination {}",
            report.run_id,
            requests.len(),
            self.settings.destination
        ));

        for request in requests {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.progress.on_source_started(&request.path);
            report.attempted += 1;
            let recorded = report.failures.len();

            let mut outcome = self.process_source(request, &mut report);
            if let Some(error) = self.logger.take_remote_failure() {
                outcome = Err(error);
            }
            let mut stop = false;
            if let Err(error) = outcome {
                if error.kind() == FailureKind::LoggingInit {
                    let message =
                        format!("audit log failed for {}: {}", request.path.display(), error);
                    self.progress.on_line(&message);
                    self.logger.crash(&message);
                    return Err(error);
                }
                self.record(&mut report, &request.path, &error);
                if error.is_batch_fatal() {
                    report.cancelled = matches!(error, EngineError::Cancelled);
                    stop = true;
                }
            }
            self.logger.close_remote();
            self.progress
                .on_source_finished(&request.path, report.failures.len() == recorded);
            if stop {
                if !report.cancelled {
                    self.logger
                        .error("stopping the batch, remaining sources are not attempted");
                }
                break;
            }
        }

        if report.had_failures() {
            self.logger.warn(&format!(
                "run {} finished with {} failure(s)",
                report.run_id,
                report.failures.len()
            ));
        } else {
            self.logger.info(&format!("run {} finished", report.run_id));
        }
        self.logger.close_user();
        self.progress.on_batch_finished(&report);
        Ok(report)
    }

    fn process_source(
        &self,
        request: &SourceRequest,
        report: &mut BatchReport,
    ) -> EngineResult<()> {
        let started = Instant::now();
        let outcome = self.policy.validate(&request.path);
        if !outcome.is_accepted() {
            if outcome.is_advisory() && self.settings.tolerant {
                self.logger.warn(&format!("{}, continuing because tolerant mode is on", outcome));
            } else {
                return Err(EngineError::Validation {
                    path: request.path.clone(),
                    outcome,
                });
            }
        }
        let source = fs::canonicalize(&request.path)
            .map_err(|e| EngineError::io("resolve", &request.path, e))?;
        let name = request.name();

        self.logger.add_remote(&name)?;
        let destination_root = self.config.destination_root(&request.destination)?;
        let destination = self.policy.mk_destination(&source, &destination_root)?;

        self.logger.info(&format!("reading structure of {}", source.display()));
        let listing = fs_ops::enumerate_tree(&source)?;
        let mut hasher = ContentHasher::new(
            listing.files.clone(),
            self.config.hash_algorithm,
            self.cancel.clone(),
        )
        .with_logger(Arc::clone(&self.logger));
        self.logger.info(&format!(
            "starting to hash {} file(s) with {}",
            hasher.file_count(),
            self.config.hash_algorithm
        ));
        hasher.start()?;

        self.logger.info(&format!(
            "starting copy: {} -> {}, {}",
            source.display(),
            destination.display(),
            fs_ops::format_bytes(listing.total_bytes)
        ));
        self.logger.debug(&self.tool.describe(&source, &destination));
        let echo = |line: &str, transient: bool| {
            if transient {
                self.progress.on_transient(line);
            } else {
                self.progress.on_line(line);
                self.logger.debug(line);
            }
        };
        let tool = self.tool.as_ref();
        let code = copy_tool::supervise(tool, &source, &destination, &self.cancel, echo)
            .map_err(|e| {
                hasher.abort();
                e
            })?;
        let description = copy_tool::describe_return_code(code);
        if !copy_tool::is_success(code) {
            hasher.abort();
            return Err(EngineError::Process { code, description });
        }
        self.logger.info(&format!("copy tool returned {} - {}", code, description));

        self.logger.info("starting size check");
        let verifier = IntegrityVerifier::new(&destination, self.cancel.clone());
        let verification = verifier.verify(&listing.files, self.progress.as_ref())?;
        self.log_problems(&listing.files, &destination, &verification);
        self.logger.info(&format!(
            "size check finished: {} file(s), {} missing, {} size mismatch(es)",
            verification.len(),
            verification.missing(),
            verification.mismatched()
        ));

        self.wait_for_hashes(&mut hasher)?;
        let hashes = hasher.into_results().ok_or(EngineError::HashingIncomplete {
            reason: "hashing finished without results",
        })?;
        self.logger.info("hashing finished");

        let manifest =
            Manifest::build(&listing.files, &hashes, &verification, &self.config.manifest);
        let audit_dir = self
            .logger
            .remote_dir()
            .unwrap_or_else(|| self.config.log_path.join(&name));
        let timestamp = run_timestamp();
        let written =
            manifest.persist(&audit_dir, &destination, &timestamp, &self.config.tsv_name)?;
        self.logger.info(&format!(
            "manifest written to {} and {}",
            written.audit_path.display(),
            written.destination_path.display()
        ));

        if let Some(error) = verification.to_error() {
            self.record(report, &request.path, &error);
        }
        self.write_side_effects(request, &name, &destination, &manifest, &timestamp, report);

        self.logger.info(&format!(
            "{} finished in {}",
            name,
            fs_ops::format_duration(started.elapsed())
        ));
        Ok(())
    }

    fn log_problems(
        &self,
        files: &[FileRecord],
        destination: &Path,
        verification: &VerificationReport,
    ) {
        for file in files {
            match verification.status(&file.relative_path) {
                Some(VerificationStatus::Missing) => {
                    self.logger.warn(&format!("missing file: {}", file.source_path.display()));
                }
                Some(VerificationStatus::SizeMismatch) => {
                    let copied = file.destination_path(destination);
                    let size = fs::metadata(&copied).map(|m| m.len()).unwrap_or_default();
                    self.logger.warn(&format!(
                        "size mismatch: {} => {}, {} => {}",
                        file.source_path.display(),
                        file.size,
                        copied.display(),
                        size
                    ));
                }
                _ => {}
            }
        }
    }

    /// Block until the hasher is done, spinning a transient status meanwhile.
    fn wait_for_hashes(&self, hasher: &mut ContentHasher) -> EngineResult<()> {
        if hasher.is_running() {
            self.logger.info("hashing is still in progress");
            let mut frame = 0;
            while hasher.is_running() {
                self.progress.on_transient(&format!("{}  ", SPINNER[frame]));
                frame = (frame + 1) % SPINNER.len();
                thread::sleep(self.spinner_interval);
            }
        }
        hasher.join()
    }

    /// Completion marker, notification and quality-check marker.
    ///
    /// Each is attempted regardless of the others and of earlier integrity
    /// problems; a failed write is recorded and the next one still runs.
    fn write_side_effects(
        &self,
        request: &SourceRequest,
        name: &str,
        destination: &Path,
        manifest: &Manifest,
        timestamp: &str,
        report: &mut BatchReport,
    ) {
        let operator = self.settings.operator(&self.config);
        if self.settings.write_trigger {
            let marker = destination.join(&self.config.trigger_name);
            match fs_ops::write_text(&marker, &operator, "write completion marker") {
                Ok(()) => self
                    .logger
                    .debug(&format!("completion marker written: {}", marker.display())),
                Err(e) => self.record(report, &request.path, &e),
            }
        }
        if self.settings.send_notification {
            match self.settings.mail_address(&self.config) {
                Some(to) => {
                    let notification = &self.config.notification;
                    let manifest_text = manifest.to_text();
                    let mail = Notification::for_source(notification, &to, name, &manifest_text);
                    let user = self.settings.user.trim();
                    match mail.drop_into(&notification.drop_path, timestamp, user, name) {
                        Ok(path) => {
                            self.logger.debug(&format!("notification dropped: {}", path.display()))
                        }
                        Err(e) => self.record(report, &request.path, &e),
                    }
                }
                None => self.logger.info("no user name set, skipping notification"),
            }
        }
        if self.settings.write_qualicheck {
            let marker = destination.join(&self.config.qualicheck_name);
            match fs_ops::write_text(&marker, &operator, "write quality-check marker") {
                Ok(()) => self
                    .logger
                    .debug(&format!("quality-check marker written: {}", marker.display())),
                Err(e) => self.record(report, &request.path, &e),
            }
        }
    }

    /// Log, echo and keep a per-source failure.
    fn record(&self, report: &mut BatchReport, source: &Path, error: &EngineError) {
        let failure = SourceFailure::from_error(source, error);
        let message = failure.to_string();
        match error {
            EngineError::Validation { outcome, .. } if outcome.is_advisory() => {
                self.logger.warn(&message)
            }
            EngineError::Cancelled => self.logger.warn(&message),
            _ => self.logger.error(&message),
        }
        self.progress.on_line(&message);
        report.failures.push(failure);
    }
}
