//! External tool invocation
//!
//! All ffmpeg/ffprobe calls go through this runner: explicit argument
//! vectors, stdout/stderr captured on drain threads (never inherited), an
//! explicit wall-clock timeout, and non-zero exit surfaced as an error
//! carrying the captured stderr.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from running an external tool
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("{tool} did not finish within {timeout:?} and was killed")]
    TimedOut { tool: String, timeout: Duration },

    #[error("unexpected {tool} output: {detail}")]
    Malformed { tool: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn malformed(tool: &str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            tool: tool.to_string(),
            detail: detail.into(),
        }
    }
}

/// Captured output of a finished tool invocation
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolOutput {
    /// Stdout interpreted as UTF-8, lossily
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Run a tool to completion with captured output and a timeout.
///
/// The child's stdout and stderr are drained on dedicated threads so a
/// chatty tool can never fill a pipe and stall. On timeout the child is
/// killed and reaped before the error is returned.
pub fn run_tool(
    tool: &str,
    args: &[String],
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    tracing::debug!("running {} {}", tool, args.join(" "));

    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ToolError::Spawn {
            tool: tool.to_string(),
            source: e,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ToolError::malformed(tool, "failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ToolError::malformed(tool, "failed to capture stderr"))?;

    let out_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let mut stdout = stdout;
        let _ = stdout.read_to_end(&mut buf);
        buf
    });
    let err_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let mut stderr = stderr;
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                tracing::warn!("{} timed out after {:?}, killing", tool, timeout);
                let _ = child.kill();
                let _ = child.wait();
                // Let the drain threads observe EOF before dropping them
                let _ = out_handle.join();
                let _ = err_handle.join();
                return Err(ToolError::TimedOut {
                    tool: tool.to_string(),
                    timeout,
                });
            }
            None => std::thread::sleep(Duration::from_millis(20)),
        }
    };

    let stdout = out_handle.join().unwrap_or_default();
    let stderr_bytes = err_handle.join().unwrap_or_default();
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

    if !status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            status: status.code().unwrap_or(-1),
            stderr,
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

/// Run ffmpeg with `-y` and the given arguments
pub fn run_ffmpeg(args: &[String], timeout: Duration) -> Result<ToolOutput, ToolError> {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push("-y".to_string());
    full.extend_from_slice(args);
    run_tool("ffmpeg", &full, timeout)
}
