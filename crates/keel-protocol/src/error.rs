//! Protocol error types

use thiserror::Error;

use crate::handshake::StartupError;

/// Errors that can occur while encoding or decoding wire payloads
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The handshake line was empty or missing its newline terminator
    #[error("Truncated handshake: the child closed the pipe before reporting")]
    TruncatedHandshake,

    /// Invalid Base64 framing
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Binary (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The launch arguments environment variable is not set
    #[error("Environment variable '{0}' is not set")]
    MissingEnvironment(&'static str),

    /// The child reported a startup failure instead of its ports
    #[error("Consensus startup failed: {0}")]
    Startup(#[from] StartupError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
