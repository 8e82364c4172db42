//! Core error types for Keel

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use keel_protocol::{ProtocolError, StartupError};

/// Top-level error type for the Keel ecosystem
#[derive(Error, Debug)]
pub enum KeelError {
    /// The desired topology is structurally invalid, or a child process
    /// failed during startup
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// Launch or handshake protocol error
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure surfaced by an external collaborator (cluster client,
    /// runtime, proxy); propagated unwrapped so the reconciliation caller
    /// can retry on its next planning tick
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl From<ProtocolError> for KeelError {
    fn from(error: ProtocolError) -> Self {
        match error {
            // A startup failure reported by a child is an input error: it
            // carries the reason (and stack trace) the child sent us.
            ProtocolError::Startup(startup) => KeelError::Input(startup.into()),
            other => KeelError::Protocol(other),
        }
    }
}

/// A fatal input error.
///
/// Raised when the desired topology is invalid relative to persisted history
/// (for example a partition-count change) or when a launched child process
/// failed to start. When the failure crossed a process boundary the original
/// stack trace is attached as a string, since it cannot be recovered
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputError {
    /// Human-readable reason
    pub reason: String,
    /// Stack trace captured on the other side of a process boundary
    pub stack_trace: Option<String>,
}

impl InputError {
    /// Create a new input error
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            stack_trace: None,
        }
    }

    /// Attach a stack trace captured across a process boundary
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stack_trace {
            Some(trace) => write!(f, "{}\n{}", self.reason, trace),
            None => write!(f, "{}", self.reason),
        }
    }
}

impl std::error::Error for InputError {}

impl From<StartupError> for InputError {
    fn from(error: StartupError) -> Self {
        Self {
            reason: error.reason,
            stack_trace: error.stack_trace,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
