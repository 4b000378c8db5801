//! External copy tool supervision.
//!
//! The byte copy is delegated to an external mirroring tool (robocopy on
//! Windows). `RoboCopy` probes the tool's help output once for optional
//! flags, then launches one child process per copy and streams its output
//! line by line. `supervise` drives a run to completion, relays every line
//! and honours the cancellation token.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use crate::error::{EngineError, EngineResult};
use crate::progress::CancelToken;

/// Arguments every copy gets after `<src> <dst> /e`.
const BASE_ARGS: &[&str] = &["/fp", "/ns", "/njh", "/njs", "/nc", "/a-:R"];

/// Highest return code that still means the copy succeeded.
pub const MAX_SUCCESS_CODE: i32 = 5;

/// True when the tool's return code belongs to the success family.
pub fn is_success(code: i32) -> bool {
    (0..=MAX_SUCCESS_CODE).contains(&code)
}

/// Human-readable meaning of a robocopy return code.
pub fn describe_return_code(code: i32) -> &'static str {
    match code {
        0 => "no files were copied, source and destination are in sync",
        1 => "all files were copied successfully",
        2 => "extra files are present at the destination, nothing was copied",
        3 => "files were copied, extra files are present at the destination",
        4 => "mismatched files or directories were detected",
        5 => "files were copied, mismatched files were detected",
        6 => "extra and mismatched files were detected, nothing was copied",
        7 => "files were copied, extra and mismatched files were detected",
        8 => "some files or directories could not be copied",
        9..=15 => "some files could not be copied, other differences were reported",
        16 => "serious error, no files were copied",
        _ => "unknown return code",
    }
}

/// A running copy: a finite stream of output lines followed by a return code.
pub trait CopyRun: Iterator<Item = EngineResult<String>> + Send {
    /// Return code, available once the line stream is exhausted.
    fn return_code(&self) -> Option<i32>;

    /// Stop the copy immediately.
    fn terminate(&mut self) -> EngineResult<()>;
}

/// Something that can copy a directory tree.
pub trait CopyTool: Send + Sync {
    fn copy_dir(&self, source: &Path, destination: &Path) -> EngineResult<Box<dyn CopyRun>>;

    /// Command line of a copy, for log lines.
    fn describe(&self, source: &Path, destination: &Path) -> String;
}

/// Wrapper around the robocopy executable.
#[derive(Debug, Clone)]
pub struct RoboCopy {
    program: OsString,
    /// Arguments placed before the copy arguments (e.g. an interpreter script)
    prefix: Vec<OsString>,
    copy_args: Vec<String>,
}

impl RoboCopy {
    /// Probe `program /?` for `/unicode` and `/compress` support.
    ///
    /// Fails with `ToolUnavailable` when the program cannot be run at all.
    pub fn detect(program: &str) -> EngineResult<Self> {
        Self::detect_with(program, Vec::new())
    }

    pub fn detect_with(program: impl Into<OsString>, prefix: Vec<OsString>) -> EngineResult<Self> {
        let mut tool = RoboCopy {
            program: program.into(),
            prefix,
            copy_args: BASE_ARGS.iter().map(|a| a.to_string()).collect(),
        };
        let unavailable = |source| EngineError::ToolUnavailable {
            program: tool.program.to_string_lossy().into_owned(),
            source,
        };
        let mut help = ChildRun::spawn(tool.command(&[OsString::from("/?")])).map_err(unavailable)?;
        let mut detected = Vec::new();
        for line in help.by_ref() {
            let line = line?.to_lowercase();
            if line.starts_with("/unicode") && !detected.contains(&"/unicode") {
                detected.push("/unicode");
            } else if line.starts_with("/compress") && !detected.contains(&"/compress") {
                detected.push("/compress");
            }
        }
        tool.copy_args.extend(detected.into_iter().map(str::to_string));
        tracing::debug!(args = ?tool.copy_args, "copy tool capabilities detected");
        Ok(tool)
    }

    pub fn copy_args(&self) -> &[String] {
        &self.copy_args
    }

    fn arguments(&self, source: &Path, destination: &Path) -> Vec<OsString> {
        let mut args = vec![
            source.as_os_str().to_os_string(),
            destination.as_os_str().to_os_string(),
            OsString::from("/e"),
        ];
        args.extend(self.copy_args.iter().map(OsString::from));
        args
    }

    fn command(&self, args: &[OsString]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.prefix)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        command
    }
}

impl CopyTool for RoboCopy {
    fn copy_dir(&self, source: &Path, destination: &Path) -> EngineResult<Box<dyn CopyRun>> {
        let command = self.command(&self.arguments(source, destination));
        let run = ChildRun::spawn(command).map_err(|source| EngineError::ToolUnavailable {
            program: self.program.to_string_lossy().into_owned(),
            source,
        })?;
        Ok(Box::new(run))
    }

    fn describe(&self, source: &Path, destination: &Path) -> String {
        std::iter::once(self.program.clone())
            .chain(self.prefix.iter().cloned())
            .chain(self.arguments(source, destination))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output stream of one child process.
///
/// Stdout is split on both `\n` and `\r` so that in-place percentage updates
/// arrive as separate lines. Stderr is collected on a helper thread and
/// yielded after stdout ends.
struct ChildRun {
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    pending: VecDeque<String>,
    return_code: Option<i32>,
    finished: bool,
}

impl ChildRun {
    fn spawn(mut command: Command) -> std::io::Result<Self> {
        let mut child = command.spawn()?;
        let stdout = child.stdout.take().map(BufReader::new);
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = pipe.read_to_end(&mut buffer);
                buffer
            })
        });
        Ok(ChildRun {
            child,
            stdout,
            stderr,
            pending: VecDeque::new(),
            return_code: None,
            finished: false,
        })
    }

    fn queue(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        self.pending.extend(
            text.split(['\r', '\n'])
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }

    fn finish(&mut self) -> EngineResult<()> {
        self.stdout = None;
        if let Some(handle) = self.stderr.take() {
            if let Ok(buffer) = handle.join() {
                self.queue(&buffer);
            }
        }
        let status = self
            .child
            .wait()
            .map_err(|e| EngineError::io("wait for", "copy tool", e))?;
        // Killed by a signal: no code, report the serious-error code
        self.return_code = Some(status.code().unwrap_or(16));
        self.finished = true;
        Ok(())
    }
}

impl Iterator for ChildRun {
    type Item = EngineResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }
            if self.finished {
                return None;
            }
            let Some(reader) = self.stdout.as_mut() else {
                if let Err(e) = self.finish() {
                    return Some(Err(e));
                }
                continue;
            };
            let mut chunk = Vec::new();
            match reader.read_until(b'\n', &mut chunk) {
                Ok(0) => {
                    if let Err(e) = self.finish() {
                        return Some(Err(e));
                    }
                }
                Ok(_) => self.queue(&chunk),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.stdout = None;
                    return Some(Err(EngineError::io("read output of", "copy tool", e)));
                }
            }
        }
    }
}

impl CopyRun for ChildRun {
    fn return_code(&self) -> Option<i32> {
        self.return_code
    }

    fn terminate(&mut self) -> EngineResult<()> {
        if self.finished {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(EngineError::io("terminate", "copy tool", e)),
        }
        let status = self
            .child
            .wait()
            .map_err(|e| EngineError::io("wait for", "copy tool", e))?;
        self.return_code = status.code();
        self.stdout = None;
        // The stderr reader ends on its own once the pipe closes
        self.stderr = None;
        self.pending.clear();
        self.finished = true;
        Ok(())
    }
}

impl Drop for ChildRun {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Drive a copy to completion.
///
/// Every line goes to `on_line` together with a flag telling whether it is a
/// transient percentage update. The token is checked after every line; once
/// set, the child is terminated and `Cancelled` is returned. Otherwise the
/// tool's return code is returned, whatever it is.
pub fn supervise(
    tool: &dyn CopyTool,
    source: &Path,
    destination: &Path,
    cancel: &CancelToken,
    mut on_line: impl FnMut(&str, bool),
) -> EngineResult<i32> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let mut run = tool.copy_dir(source, destination)?;
    while let Some(line) = run.next() {
        let line = line?;
        on_line(&line, line.ends_with('%'));
        if cancel.is_cancelled() {
            run.terminate()?;
            return Err(EngineError::Cancelled);
        }
    }
    run.return_code().ok_or_else(|| {
        let missing = std::io::Error::new(std::io::ErrorKind::Other, "no return code");
        EngineError::io("collect return code of", "copy tool", missing)
    })
}
