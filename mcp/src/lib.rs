//! Stdio JSON-RPC transport, protocol, and process supervisor for tool-server subprocesses.
//!
//! A tool server is an external subprocess speaking JSON-RPC 2.0 over newline-framed stdio
//! (the MCP convention). This crate owns the three layers between "spawn a process" and
//! "call a tool": [`transport::StdioTransport`] frames bytes, [`protocol::Protocol`] correlates
//! requests/responses and exposes the domain methods, and [`supervisor::ProcessSupervisor`]
//! owns a named set of servers, their connection pools, and health monitoring.

pub mod error;
pub mod protocol;
pub mod supervisor;
pub mod transport;
pub mod wire;

pub use error::McpError;
pub use protocol::{Protocol, ServerCapabilities};
pub use supervisor::{ManagedServer, PoolStatus, ProcessSupervisor, ServerConfig};
pub use transport::{SpawnConfig, StdioTransport, Transport, TransportState, WireFormat};
pub use wire::{JsonRpcError, JsonRpcMessage};
