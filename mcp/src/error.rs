//! Error type for the tool-server subsystem.
//!
//! A small, manually-implemented enum: one variant per failure class, `Display` for human text,
//! `Error` for interop with `Box<dyn Error + Send + Sync>` at async trait boundaries.

use std::fmt;

#[derive(Debug, Clone)]
pub enum McpError {
    /// The transport could not be established (spawn failure, closed stdin, etc).
    Connection(String),
    /// A frame could not be parsed as a JSON-RPC message.
    Parse(String),
    /// The transport is not connected.
    NotConnected,
    /// A domain call was attempted before `initialize`/`initialized` completed.
    NotInitialized,
    /// The server's capabilities do not include the requested domain (tools/resources).
    CapabilityMissing(&'static str),
    /// The server returned a JSON-RPC error object.
    Rpc { code: i64, message: String },
    /// A request exceeded its deadline.
    Timeout,
    /// The connection pool for a server is at capacity.
    PoolFull(String),
    /// No server is registered under this name.
    NotFound(String),
    /// A server with this name is already running.
    AlreadyRunning(String),
    /// The supervisor's restart budget for a server has been exhausted.
    RestartLimitExceeded(String),
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::Connection(msg) => write!(f, "connection error: {}", msg),
            McpError::Parse(msg) => write!(f, "parse error: {}", msg),
            McpError::NotConnected => write!(f, "transport not connected"),
            McpError::NotInitialized => write!(f, "protocol not initialized"),
            McpError::CapabilityMissing(domain) => {
                write!(f, "server does not advertise the '{}' capability", domain)
            }
            McpError::Rpc { code, message } => write!(f, "rpc error {}: {}", code, message),
            McpError::Timeout => write!(f, "request timed out"),
            McpError::PoolFull(name) => write!(f, "connection pool for '{}' is full", name),
            McpError::NotFound(name) => write!(f, "no server named '{}'", name),
            McpError::AlreadyRunning(name) => write!(f, "server '{}' is already running", name),
            McpError::RestartLimitExceeded(name) => {
                write!(f, "server '{}' exceeded its restart limit", name)
            }
        }
    }
}

impl std::error::Error for McpError {}

impl McpError {
    /// Standard JSON-RPC and MCP-domain error codes are retryable when they indicate a
    /// transport/server-side condition rather than a malformed request.
    pub fn is_retryable(&self) -> bool {
        match self {
            McpError::Connection(_) | McpError::NotConnected | McpError::Timeout => true,
            McpError::Rpc { code, .. } => matches!(*code, -32000 | -32001 | -32603),
            _ => false,
        }
    }
}
