//! Transport: a bidirectional, message-oriented channel carrying framed JSON-RPC messages.
//!
//! The default wire framing is newline-delimited JSON, the MCP stdio convention. A server may
//! instead be spawned with `WireFormat::ContentLength` for compatibility with LSP-style
//! servers; this is a supplemental knob, not part of the newline-framed contract itself.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::McpError;
use crate::wire::JsonRpcMessage;

/// Grace period `close()` waits for the child to exit before force-terminating it.
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// One JSON object per line (MCP default).
    LineDelimited,
    /// `Content-Length: N\r\n\r\n<N bytes>` framing (LSP style).
    ContentLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connected,
}

/// Spawn configuration for a stdio transport.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub wire_format: WireFormat,
}

impl SpawnConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            wire_format: WireFormat::LineDelimited,
        }
    }

    /// Expand `${VAR}` tokens in the env map from the current process environment, per the
    /// supervisor's spawn contract.
    pub fn expand_env(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), expand_vars(v)))
            .collect()
    }
}

fn expand_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        rest = &rest[start + 2..];
        if let Some(end) = rest.find('}') {
            let var_name = &rest[..end];
            if let Ok(val) = std::env::var(var_name) {
                out.push_str(&val);
            }
            rest = &rest[end + 1..];
        } else {
            out.push_str("${");
            break;
        }
    }
    out.push_str(rest);
    out
}

/// A bidirectional, message-oriented channel. `connect`/`send`/`receive`/`close` are the
/// contract; `isConnected` maps to `state()`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), McpError>;
    async fn receive(&self) -> Result<JsonRpcMessage, McpError>;
    async fn close(&self) -> Result<(), McpError>;
    fn state(&self) -> TransportState;
}

/// Stdio transport: spawns a child process, frames outgoing messages, and parses incoming
/// ones. stderr is drained to the log sink on its own task so a noisy server cannot deadlock
/// its own stdout pipe.
pub struct StdioTransport {
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<ChildStdin>>,
    stdout: Arc<Mutex<BufReader<ChildStdout>>>,
    stderr_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    connected: AtomicBool,
    wire_format: WireFormat,
    command: String,
}

impl StdioTransport {
    /// Spawn the configured command and wire its stdio. Does not perform the protocol
    /// handshake; that is the caller's (`Protocol::initialize`) responsibility.
    pub fn spawn(config: &SpawnConfig) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in config.expand_env() {
            cmd.env(k, v);
        }
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::Connection(format!("spawn '{}': {}", config.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connection("no stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connection("no stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Connection("no stderr handle".to_string()))?;

        let command_name = config.command.clone();
        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim_end();
                        if !trimmed.is_empty() {
                            log::warn!("[{}] {}", command_name, trimmed);
                        }
                    }
                    Err(e) => {
                        log::warn!("[{}] stderr read error: {}", command_name, e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child: Arc::new(Mutex::new(Some(child))),
            stdin: Arc::new(Mutex::new(stdin)),
            stdout: Arc::new(Mutex::new(BufReader::new(stdout))),
            stderr_task: Mutex::new(Some(stderr_task)),
            connected: AtomicBool::new(true),
            wire_format: config.wire_format,
            command: config.command.clone(),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), McpError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected);
        }
        let mut stdin = self.stdin.lock().await;
        let bytes = match self.wire_format {
            WireFormat::LineDelimited => message
                .to_frame()
                .map_err(|e| McpError::Parse(e.to_string()))?
                .into_bytes(),
            WireFormat::ContentLength => {
                let body = serde_json::to_vec(message).map_err(|e| McpError::Parse(e.to_string()))?;
                let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
                framed.extend_from_slice(&body);
                framed
            }
        };
        stdin
            .write_all(&bytes)
            .await
            .map_err(|e| McpError::Connection(format!("write to '{}': {}", self.command, e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Connection(format!("flush to '{}': {}", self.command, e)))
    }

    async fn receive(&self) -> Result<JsonRpcMessage, McpError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected);
        }
        let mut stdout = self.stdout.lock().await;
        match self.wire_format {
            WireFormat::LineDelimited => {
                let mut line = String::new();
                let n = stdout
                    .read_line(&mut line)
                    .await
                    .map_err(|e| McpError::Connection(e.to_string()))?;
                if n == 0 {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(McpError::NotConnected);
                }
                JsonRpcMessage::from_line(line.trim_end()).map_err(|e| {
                    McpError::Parse(format!("malformed frame from '{}': {}", self.command, e))
                })
            }
            WireFormat::ContentLength => {
                let mut header = String::new();
                let mut content_length: Option<usize> = None;
                loop {
                    header.clear();
                    let n = stdout
                        .read_line(&mut header)
                        .await
                        .map_err(|e| McpError::Connection(e.to_string()))?;
                    if n == 0 {
                        self.connected.store(false, Ordering::SeqCst);
                        return Err(McpError::NotConnected);
                    }
                    let trimmed = header.trim_end();
                    if trimmed.is_empty() {
                        break;
                    }
                    if let Some(rest) = trimmed.strip_prefix("Content-Length:") {
                        content_length = rest.trim().parse().ok();
                    }
                }
                let len = content_length
                    .ok_or_else(|| McpError::Parse("missing Content-Length header".to_string()))?;
                let mut buf = vec![0u8; len];
                stdout
                    .read_exact(&mut buf)
                    .await
                    .map_err(|e| McpError::Connection(e.to_string()))?;
                serde_json::from_slice(&buf).map_err(|e| McpError::Parse(e.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(()); // idempotent
        }
        if let Some(task) = self.stderr_task.lock().await.take() {
            task.abort();
        }
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let _ = child.start_kill();
            let wait = timeout(CLOSE_GRACE_PERIOD, child.wait()).await;
            if wait.is_err() {
                let _ = child.start_kill();
            }
        }
        Ok(())
    }

    fn state(&self) -> TransportState {
        if self.connected.load(Ordering::SeqCst) {
            TransportState::Connected
        } else {
            TransportState::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_expansion_substitutes_known_vars() {
        std::env::set_var("SIGIL_MCP_TEST_VAR", "value123");
        let expanded = expand_vars("prefix-${SIGIL_MCP_TEST_VAR}-suffix");
        assert_eq!(expanded, "prefix-value123-suffix");
    }

    #[test]
    fn env_expansion_leaves_unknown_vars_blank() {
        std::env::remove_var("SIGIL_MCP_TEST_MISSING");
        let expanded = expand_vars("a-${SIGIL_MCP_TEST_MISSING}-b");
        assert_eq!(expanded, "a--b");
    }

    #[tokio::test]
    async fn stdio_transport_round_trips_with_cat() {
        let config = SpawnConfig::new("cat");
        let transport = StdioTransport::spawn(&config).expect("spawn cat");
        let msg = JsonRpcMessage::request(1, "ping", None);
        transport.send(&msg).await.expect("send");
        let received = transport.receive().await.expect("receive");
        assert_eq!(received.id, Some(1));
        assert_eq!(received.method.as_deref(), Some("ping"));
        transport.close().await.expect("close");
        // idempotent
        transport.close().await.expect("close again");
        assert_eq!(transport.state(), TransportState::Disconnected);
    }
}
