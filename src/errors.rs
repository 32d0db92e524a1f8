//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering process-level failure modes.
///
/// Per-connection and per-agent failures are reported as data (see
/// [`crate::models::ErrorCode`]) and never travel through this type.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Sending to or closing a client transport failed.
    Transport(String),
    /// Malformed wire payload.
    Protocol(String),
    /// Agent execution returned an error.
    Agent(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Audit trail could not be written.
    Audit(String),
    /// File-system, socket, or other I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Audit(msg) => write!(f, "audit: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
