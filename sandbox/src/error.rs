//! Error type for the sandbox subsystem.

use std::fmt;

#[derive(Debug, Clone)]
pub enum SandboxError {
    Io(String),
    Git(String),
    NotFound(String),
    AlreadyExists(String),
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::Io(msg) => write!(f, "io error: {}", msg),
            SandboxError::Git(msg) => write!(f, "git command failed: {}", msg),
            SandboxError::NotFound(id) => write!(f, "sandbox not found: {}", id),
            SandboxError::AlreadyExists(id) => write!(f, "sandbox already exists: {}", id),
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        SandboxError::Io(e.to_string())
    }
}
