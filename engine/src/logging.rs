//! Audit logging for a run.
//!
//! A `RunLogger` owns three file sinks with independent lifecycles:
//! - process: opened at startup, closed at shutdown or crash
//! - remote: one per source, under the shared audit-log root
//! - user: optional, requested by the caller, informational records only
//!
//! Each sink is guarded by its own mutex and flushed after every record.
//! Records are also forwarded to `tracing` so the console sees them too.
//!
//! A sink that fails to write is reported once, to `tracing` and to the
//! process log, and then stays silent. A failed remote log is kept for the
//! orchestrator, which treats it like one that could not be opened.

use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;
use tempfile::TempPath;
use tracing::Level;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::fs_ops;

/// Timestamp used as file name prefix for logs, manifests and crash records.
pub fn run_timestamp() -> String {
    Local::now().format("%y%m%d-%H%M%S").to_string()
}

struct OpenSink {
    path: PathBuf,
    writer: LineWriter<File>,
    failed: bool,
}

struct Sink {
    name: &'static str,
    floor: Level,
    inner: Mutex<Option<OpenSink>>,
}

impl Sink {
    fn new(name: &'static str, floor: Level) -> Self {
        Sink {
            name,
            floor,
            inner: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<OpenSink>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, path: &Path, truncate: bool) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!truncate)
            .truncate(truncate)
            .open(path)?;
        *self.lock() = Some(OpenSink {
            path: path.to_path_buf(),
            writer: LineWriter::new(file),
            failed: false,
        });
        Ok(())
    }

    /// Append `line` if `level` passes the floor.
    ///
    /// Only the first failure of an open sink is returned, together with the
    /// sink's path; later records are dropped until the sink is reopened.
    fn write(&self, level: Level, line: &str) -> Result<(), (PathBuf, io::Error)> {
        // tracing orders levels by verbosity: ERROR < WARN < INFO < DEBUG < TRACE
        if level > self.floor {
            return Ok(());
        }
        let mut guard = self.lock();
        let sink = match guard.as_mut() {
            Some(sink) if !sink.failed => sink,
            _ => return Ok(()),
        };
        let written = sink
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| sink.writer.flush());
        written.map_err(|e| {
            sink.failed = true;
            (sink.path.clone(), e)
        })
    }

    fn close(&self) -> Option<PathBuf> {
        let mut sink = self.lock().take()?;
        let _ = sink.writer.flush();
        Some(sink.path)
    }

    fn is_open(&self) -> bool {
        self.lock().is_some()
    }
}

/// Where the user log ends up when it is closed.
enum UserTarget {
    Direct,
    /// Written to a temporary file because the requested path lies inside a
    /// source tree; moved to `target` on close.
    Redirected { temp: TempPath, target: PathBuf },
}

/// Explicit logging context for one invocation.
pub struct RunLogger {
    log_root: PathBuf,
    log_name: String,
    process: Sink,
    remote: Sink,
    remote_dir: Mutex<Option<PathBuf>>,
    user: Sink,
    user_target: Mutex<Option<UserTarget>>,
    remote_failure: Mutex<Option<EngineError>>,
}

impl RunLogger {
    /// Open the process-lifetime log. Without it there is no audit trail, so
    /// failure is a `LoggingInit` error.
    pub fn init(log_root: &Path, process_log: &Path, log_name: &str) -> EngineResult<Self> {
        let logger = RunLogger {
            log_root: log_root.to_path_buf(),
            log_name: log_name.to_string(),
            process: Sink::new("process", Level::TRACE),
            remote: Sink::new("remote", Level::TRACE),
            remote_dir: Mutex::new(None),
            user: Sink::new("user", Level::INFO),
            user_target: Mutex::new(None),
            remote_failure: Mutex::new(None),
        };
        if let Some(parent) = process_log.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| EngineError::LoggingInit {
                path: process_log.to_path_buf(),
                source,
            })?;
        }
        logger
            .process
            .open(process_log, true)
            .map_err(|source| EngineError::LoggingInit {
                path: process_log.to_path_buf(),
                source,
            })?;
        logger.debug(&format!("process log opened at {}", process_log.display()));
        Ok(logger)
    }

    pub fn from_config(config: &Config) -> EngineResult<Self> {
        Self::init(&config.log_path, &config.process_log, &config.log_name)
    }

    pub fn log(&self, level: Level, message: &str) {
        let line = format!(
            "{} {}: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            message
        );
        let failures: Vec<_> = [&self.process, &self.remote, &self.user]
            .into_iter()
            .filter_map(|sink| sink.write(level, &line).err().map(|(path, e)| (sink, path, e)))
            .collect();
        match level {
            Level::ERROR => tracing::error!(target: "cirdan::audit", "{}", message),
            Level::WARN => tracing::warn!(target: "cirdan::audit", "{}", message),
            Level::INFO => tracing::info!(target: "cirdan::audit", "{}", message),
            Level::DEBUG => tracing::debug!(target: "cirdan::audit", "{}", message),
            _ => tracing::trace!(target: "cirdan::audit", "{}", message),
        }
        for (sink, path, error) in failures {
            self.sink_failed(sink, path, error);
        }
    }

    /// Report a sink that just stopped accepting records.
    ///
    /// Goes straight to the process sink and `tracing`, never back through
    /// `log`, so a failing sink cannot recurse.
    fn sink_failed(&self, sink: &Sink, path: PathBuf, error: io::Error) {
        let message = format!("cannot write {} log {}: {}", sink.name, path.display(), error);
        tracing::error!(target: "cirdan::audit", sink = sink.name, "{}", message);
        if !std::ptr::eq(sink, &self.process) {
            let line = format!(
                "{} {}: {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                Level::ERROR,
                message
            );
            if let Err((_, e)) = self.process.write(Level::ERROR, &line) {
                tracing::error!(error = %e, "process log rejected the failure record");
            }
        }
        if std::ptr::eq(sink, &self.remote) {
            let mut pending = self.remote_failure.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.is_none() {
                *pending = Some(EngineError::LogWrite { path, source: error });
            }
        }
    }

    /// Write failure of the remote log since the last call, if any.
    pub fn take_remote_failure(&self) -> Option<EngineError> {
        self.remote_failure.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }

    /// Open the remote log of one source at `<root>/<source>/<timestamp>-<log_name>`.
    ///
    /// Any previously open remote log is closed first.
    pub fn add_remote(&self, source_name: &str) -> EngineResult<PathBuf> {
        self.close_remote();
        let dir = self.log_root.join(source_name);
        let path = dir.join(format!("{}-{}", run_timestamp(), self.log_name));
        let logging_error = |source| EngineError::LoggingInit {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&dir).map_err(logging_error)?;
        self.remote.open(&path, false).map_err(logging_error)?;
        *self.remote_dir.lock().unwrap_or_else(PoisonError::into_inner) = Some(dir);
        self.debug(&format!("remote log opened at {}", path.display()));
        Ok(path)
    }

    /// Close the remote log. Safe to call when none is open.
    pub fn close_remote(&self) {
        if let Some(path) = self.remote.close() {
            *self.remote_dir.lock().unwrap_or_else(PoisonError::into_inner) = None;
            self.debug(&format!("remote log closed: {}", path.display()));
        }
    }

    /// Directory of the currently open remote log.
    pub fn remote_dir(&self) -> Option<PathBuf> {
        self.remote_dir.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Open the user log at `requested`.
    ///
    /// When `requested` lies inside one of `source_paths` the copy tool would
    /// pick up the growing log, so records go to a temporary file that is
    /// moved to `requested` by `close_user`.
    pub fn add_user(&self, requested: &Path, source_paths: &[PathBuf]) -> EngineResult<()> {
        self.close_user();
        let requested = resolve_target(requested);
        let inside_source = source_paths
            .iter()
            .map(|source| fs::canonicalize(source).unwrap_or_else(|_| absolute(source)))
            .any(|source| requested.starts_with(&source));

        if inside_source {
            let temp = tempfile::Builder::new()
                .prefix("cirdan-user-")
                .suffix(".log")
                .tempfile()
                .map_err(|e| EngineError::io("create temporary user log", std::env::temp_dir(), e))?
                .into_temp_path();
            self.user
                .open(&temp, true)
                .map_err(|e| EngineError::io("open user log", temp.to_path_buf(), e))?;
            self.info(&format!(
                "user log {} lies inside a source tree, writing to {} until the run is over",
                requested.display(),
                temp.display()
            ));
            *self.user_target.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(UserTarget::Redirected {
                    temp,
                    target: requested,
                });
        } else {
            if let Some(parent) = requested.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| EngineError::io("create directory", parent, e))?;
            }
            self.user
                .open(&requested, true)
                .map_err(|e| EngineError::io("open user log", &requested, e))?;
            *self.user_target.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(UserTarget::Direct);
        }
        Ok(())
    }

    /// Close the user log, moving a redirected log into place.
    ///
    /// A failed move is logged to the process log, never raised.
    pub fn close_user(&self) {
        let target = self.user_target.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.user.close();
        if let Some(UserTarget::Redirected { temp, target }) = target {
            match fs_ops::relocate_file(&temp, &target) {
                Ok(()) => self.debug(&format!("user log moved to {}", target.display())),
                Err(e) => self.error(&format!("unable to move user log: {}", e)),
            }
        }
    }

    /// Terminal path for fatal conditions.
    ///
    /// Records `message`, closes every sink and copies the process log to a
    /// timestamped crash record under the audit-log root. Returns the crash
    /// record's path when the copy succeeded.
    pub fn crash(&self, message: &str) -> Option<PathBuf> {
        self.error(message);
        self.close_remote();
        self.close_user();
        let process_path = self.process.close()?;
        let file_name = process_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "process.log".to_string());
        let crash_path = self.log_root.join(format!("{}-crash-{}", run_timestamp(), file_name));
        let copied = fs::create_dir_all(&self.log_root)
            .and_then(|_| fs::copy(&process_path, &crash_path));
        match copied {
            Ok(_) => {
                tracing::error!(crash_record = %crash_path.display(), "run crashed: {}", message);
                Some(crash_path)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "run crashed and no crash record could be written: {}",
                    message
                );
                None
            }
        }
    }

    /// Close every sink at shutdown.
    pub fn close(&self) {
        self.close_remote();
        self.close_user();
        if self.process.is_open() {
            self.debug("process log closed");
        }
        self.process.close();
    }
}

impl Drop for RunLogger {
    fn drop(&mut self) {
        self.close();
    }
}

/// Absolute form of a file path whose parent directory may already exist.
fn resolve_target(path: &Path) -> PathBuf {
    let path = absolute(path);
    match (path.parent().map(fs::canonicalize), path.file_name()) {
        (Some(Ok(parent)), Some(name)) => parent.join(name),
        _ => path,
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
