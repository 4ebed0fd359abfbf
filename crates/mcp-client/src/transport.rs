//! MCP transport layer.
//!
//! - **Stdio**: spawn a child process, newline-delimited JSON-RPC over
//!   stdin/stdout. Cancellation is best-effort: the child is torn down on
//!   shutdown, in-flight calls resolve with a transport error.
//! - **Http / Sse**: one JSON-RPC exchange per HTTP POST (the `sse`
//!   config kind is served by the same transport).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use crate::protocol::{OutboundFrame, ResponseFrame};

/// Per-request timeout on every transport.
const REQUEST_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(30);

/// Trait for MCP server transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and return the unwrapped JSON-RPC result value.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str) -> Result<(), TransportError>;

    fn is_alive(&self) -> bool;

    /// Shut down the transport gracefully.
    async fn shutdown(&self);
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP server process has exited")]
    ProcessExited,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("HTTP: {0}")]
    Http(String),

    #[error("{0}")]
    Rpc(#[from] crate::protocol::RpcError),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Non-JSON stdout lines tolerated before declaring the server broken.
const MAX_SKIP_LINES: usize = 1000;

/// Child-process transport; each JSON-RPC message is one line.
///
/// `request_gate` serializes full request/response cycles so concurrent
/// callers cannot read each other's responses.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    request_gate: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawn the configured child process.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&std::path::Path>,
    ) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_gate: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read the next JSON line, tolerating log noise on stdout.
    async fn read_json_line(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let n = stdout.read_line(&mut line).await?;
            if n == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_owned());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "MCP server produced too many non-JSON lines on stdout",
                )));
            }
            tracing::debug!(line = %trimmed, "skipping non-JSON line from MCP server stdout");
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let _guard = self.request_gate.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = OutboundFrame::request(id, method, params);
        let json = serde_json::to_string(&frame)?;

        tracing::debug!(id, method, "sending MCP request");
        self.write_line(&json).await?;

        // Servers may interleave notifications; skip frames until the
        // response with our id arrives.
        let response = tokio::time::timeout(REQUEST_TIMEOUT, async {
            loop {
                let line = self.read_json_line().await?;
                if let Ok(resp) = serde_json::from_str::<ResponseFrame>(&line) {
                    if resp.id == id {
                        return Ok::<ResponseFrame, TransportError>(resp);
                    }
                }
                tracing::debug!(line = %line, "skipping non-matching MCP frame");
            }
        })
        .await
        .map_err(|_| TransportError::Timeout)??;

        Ok(response.into_result()?)
    }

    async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let json = serde_json::to_string(&OutboundFrame::notification(method))?;
        self.write_line(&json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing MCP server stdin");
            }
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(tokio::time::Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "MCP server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for MCP server process");
            }
            Err(_) => {
                tracing::warn!("MCP server did not exit within timeout, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill MCP server process");
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One JSON-RPC exchange per POST.
pub struct HttpTransport {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl HttpTransport {
    pub fn connect(url: &str, headers: &HashMap<String, String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Http(format!("building HTTP client: {e}")))?;
        Ok(Self {
            url: url.to_owned(),
            headers: headers.clone(),
            client,
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    async fn post(&self, frame: &OutboundFrame) -> Result<Option<ResponseFrame>, TransportError> {
        let mut req = self.client.post(&self.url).json(frame);
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Http(format!("HTTP {}", status.as_u16())));
        }
        if frame.id.is_none() {
            return Ok(None);
        }
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(format!("reading response: {e}")))?;
        Ok(Some(serde_json::from_str(&body)?))
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = OutboundFrame::request(id, method, params);
        let response = self
            .post(&frame)
            .await?
            .ok_or_else(|| TransportError::Http("missing response body".into()))?;
        Ok(response.into_result()?)
    }

    async fn notify(&self, method: &str) -> Result<(), TransportError> {
        self.post(&OutboundFrame::notification(method)).await?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}
