//! The root error taxonomy.
//!
//! One type spans every subsystem so callers at the orchestrator boundary can classify a
//! failure without knowing which layer produced it. A plain enum with `Display`/`Error`
//! implemented by hand, no external error-derive crate.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Model,
    SourceControl,
    Filesystem,
    Validation,
    Network,
    Input,
    Output,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::Model => "model",
            ErrorKind::SourceControl => "source-control",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Input => "input",
            ErrorKind::Output => "output",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// A taxonomy error: kind, operation, human message, optional cause, and a small context bag.
/// No secret material (api keys, env vars) may appear in `message` or `context`.
#[derive(Debug)]
pub struct SigilError {
    pub kind: ErrorKind,
    pub operation: String,
    pub message: String,
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
    pub context: HashMap<String, String>,
}

impl SigilError {
    pub fn new(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
            cause: None,
            context: HashMap::new(),
        }
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn config(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, operation, message)
    }

    pub fn model(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Model, operation, message)
    }

    pub fn source_control(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceControl, operation, message)
    }

    pub fn filesystem(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Filesystem, operation, message)
    }

    pub fn validation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, operation, message)
    }

    pub fn network(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, operation, message)
    }

    pub fn input(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Input, operation, message)
    }

    pub fn output(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Output, operation, message)
    }

    pub fn internal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, operation, message)
    }
}

impl fmt::Display for SigilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.operation, self.message)
    }
}

impl StdError for SigilError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<sigil_mcp::McpError> for SigilError {
    fn from(e: sigil_mcp::McpError) -> Self {
        SigilError::network("tool-server", e.to_string())
    }
}

impl From<sandbox::SandboxError> for SigilError {
    fn from(e: sandbox::SandboxError) -> Self {
        SigilError::filesystem("sandbox", e.to_string())
    }
}
