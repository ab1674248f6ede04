//! Helpers for running child processes with bounded output.
//!
//! Calls block until the child exits; there is no internal timeout.

use std::ffi::OsStr;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

/// Default bound on captured stdout and stderr, per stream.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Command failed: {command}\nExit code: {code}{}", detail_suffix(.detail))]
    Failed {
        command: String,
        code: i32,
        detail: String,
    },
    #[error("{command} produced more than {limit} bytes of output")]
    OutputLimitExceeded { command: String, limit: usize },
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!("\n{detail}")
    }
}

/// Captured child process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; a child killed by a signal reports 1.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Trimmed stderr, falling back to trimmed stdout.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// How to run one external command.
#[derive(Debug, Clone)]
pub struct RunOptions<'a> {
    pub cwd: Option<&'a Path>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<&'a [u8]>,
    pub allow_failure: bool,
    pub output_limit_bytes: usize,
}

impl Default for RunOptions<'_> {
    fn default() -> Self {
        Self {
            cwd: None,
            env: Vec::new(),
            stdin: None,
            allow_failure: false,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl<'a> RunOptions<'a> {
    pub fn in_dir(cwd: &'a Path) -> Self {
        Self {
            cwd: Some(cwd),
            ..Self::default()
        }
    }

    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    pub fn stdin(mut self, input: &'a [u8]) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Run `program args...` and capture its output.
///
/// Output is read concurrently while the child runs so a chatty child cannot
/// deadlock on a full pipe. A nonzero exit is returned to the caller when
/// `allow_failure` is set and is a [`ProcessError::Failed`] otherwise. Failing
/// to spawn is always an error.
#[instrument(
    skip_all,
    fields(program = %program.as_ref().to_string_lossy(), allow_failure = opts.allow_failure)
)]
pub fn run_command<S: AsRef<OsStr>>(
    program: S,
    args: &[&str],
    opts: &RunOptions<'_>,
) -> Result<CommandOutput> {
    let label = command_label(program.as_ref(), args);

    let mut cmd = Command::new(program.as_ref());
    cmd.args(args);
    if let Some(cwd) = opts.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }
    if opts.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(command = %label, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, command = %label, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {label}"));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = opts.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    if let Some(input) = opts.stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        match child_stdin.write_all(input) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                warn!(command = %label, "child closed stdin before reading all input");
            }
            Err(e) => return Err(e).with_context(|| format!("write stdin for {label}")),
        }
    }

    let status = child
        .wait()
        .with_context(|| format!("wait for {label}"))?;

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, command = %label, "output limit exceeded");
        return Err(ProcessError::OutputLimitExceeded {
            command: label,
            limit,
        }
        .into());
    }

    let output = CommandOutput {
        status: status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    };
    debug!(exit_code = output.status, "command finished");

    if !opts.allow_failure && !output.success() {
        return Err(ProcessError::Failed {
            detail: output.diagnostic().to_string(),
            command: label,
            code: output.status,
        }
        .into());
    }
    Ok(output)
}

fn command_label(program: &OsStr, args: &[&str]) -> String {
    let mut label = program.to_string_lossy().into_owned();
    for arg in args {
        label.push(' ');
        label.push_str(arg);
    }
    label
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Drain `reader` to the end, keeping at most `limit` bytes.
fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
