//! Shell execution — run a command foreground, wait for exit, return
//! captured output. Output is capped so a chatty command cannot flood the
//! model context; the cap trims from the front on a char boundary.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Default hard timeout for a foreground command.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Combined-output cap in characters.
const MAX_OUTPUT_CHARS: usize = 64 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    /// Hard timeout in seconds.
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
}

/// Environment variable names a model-supplied command may not override.
fn is_blocked_env_var(name: &str) -> bool {
    const BLOCKED: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "DYLD_INSERT_LIBRARIES",
        "DYLD_LIBRARY_PATH",
        "PATH",
        "HOME",
        "SHELL",
        "SSH_AUTH_SOCK",
        "BASH_ENV",
        "ENV",
        "IFS",
    ];
    BLOCKED.contains(&name.to_ascii_uppercase().as_str())
}

/// Bounded accumulator for interleaved stdout/stderr.
#[derive(Default)]
struct OutputBuffer {
    combined: String,
}

impl OutputBuffer {
    fn push_line(&mut self, line: &str) {
        self.combined.push_str(line);
        self.combined.push('\n');
        if self.combined.len() > MAX_OUTPUT_CHARS {
            let keep = MAX_OUTPUT_CHARS * 3 / 4;
            let mut boundary = self.combined.len() - keep;
            while boundary < self.combined.len() && !self.combined.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.combined.drain(..boundary);
        }
    }
}

/// Run a command under `sh -c` in `workdir` and capture its output.
pub async fn run(req: ExecRequest, workdir: &Path) -> std::io::Result<ExecResult> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&req.command)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(env) = &req.env {
        for (key, value) in env {
            if is_blocked_env_var(key) {
                return Ok(ExecResult {
                    exit_code: None,
                    output: format!("environment variable '{key}' is blocked"),
                    timed_out: false,
                });
            }
            cmd.env(key, value);
        }
    }

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "failed to capture child stdout")
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "failed to capture child stderr")
    })?;

    let mut buffer = OutputBuffer::default();
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();

    let timeout =
        tokio::time::Duration::from_secs(req.timeout_sec.unwrap_or(DEFAULT_TIMEOUT_SECS));
    let deadline = tokio::time::Instant::now() + timeout;

    let mut out_done = false;
    let mut err_done = false;
    while !(out_done && err_done) {
        tokio::select! {
            line = out_lines.next_line(), if !out_done => match line? {
                Some(l) => buffer.push_line(&l),
                None => out_done = true,
            },
            line = err_lines.next_line(), if !err_done => match line? {
                Some(l) => buffer.push_line(&l),
                None => err_done = true,
            },
            _ = tokio::time::sleep_until(deadline) => {
                let _ = child.kill().await;
                return Ok(ExecResult {
                    exit_code: None,
                    output: buffer.combined,
                    timed_out: true,
                });
            }
        }
    }

    let status = tokio::time::timeout_at(deadline, child.wait()).await;
    match status {
        Ok(status) => {
            let status = status?;
            Ok(ExecResult {
                exit_code: status.code(),
                output: buffer.combined,
                timed_out: false,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            Ok(ExecResult { exit_code: None, output: buffer.combined, timed_out: true })
        }
    }
}
