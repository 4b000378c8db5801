//! Progress reporting and cancellation.
//!
//! The orchestrator never prints. Everything meant for the user goes through a
//! `ProgressCallback`, so the CLI and any front-end can render it their own way.
//! Cancellation flows the other way through a shared `CancelToken`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::BatchReport;

/// Receives the echo stream of a run.
///
/// All methods are called from the thread driving the orchestrator.
pub trait ProgressCallback: Send + Sync {
    /// A permanent line of output.
    fn on_line(&self, line: &str);

    /// A transient status (percentage, spinner) that replaces the previous one.
    fn on_transient(&self, status: &str);

    /// Called before a source enters the pipeline.
    fn on_source_started(&self, _source: &Path) {}

    /// Called after a source left the pipeline, successfully or not.
    fn on_source_finished(&self, _source: &Path, _succeeded: bool) {}

    /// Called once when the batch is over.
    fn on_batch_finished(&self, _report: &BatchReport) {}
}

/// Callback that drops everything.
pub struct SilentProgress;

impl ProgressCallback for SilentProgress {
    fn on_line(&self, _line: &str) {}

    fn on_transient(&self, _status: &str) {}
}

/// Cooperative cancellation flag shared between the front-end and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
    /// The shared flag itself, for signal handlers that can only set an
    /// `AtomicBool`.
    pub fn as_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}
