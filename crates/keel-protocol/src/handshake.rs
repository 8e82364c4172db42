//! One-shot FIFO handshake between a consensus launcher and its child
//!
//! A freshly spawned consensus process binds its server to an OS-assigned
//! port, so the launcher cannot know the address up front. The child reports
//! exactly one line over a named pipe: the Base64 encoding of a
//! bincode-serialized [`StartupOutcome`], terminated by `'\n'`. The Base64
//! framing exists because the payload size is not known in advance; the
//! newline demarcates the end.
//!
//! The parent blocks until that single line arrives. A [`StartupOutcome::Error`]
//! value is fatal and must be re-raised to the reconciliation caller instead
//! of being returned as an address.

use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A startup failure reported across the process boundary.
///
/// The original stack trace is lost when an error crosses a process, so the
/// child captures it as a string and sends it along with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupError {
    /// Human-readable reason for the failure
    pub reason: String,
    /// Stack trace captured in the child, if available
    pub stack_trace: Option<String>,
}

impl StartupError {
    /// Create a new startup error
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            stack_trace: None,
        }
    }

    /// Attach a captured stack trace
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stack_trace {
            Some(trace) => write!(f, "{}\n{}", self.reason, trace),
            None => write!(f, "{}", self.reason),
        }
    }
}

impl std::error::Error for StartupError {}

/// What a consensus child process reports back to its launcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupOutcome {
    /// The server came up; these are its OS-assigned ports
    Ports {
        /// Bound gRPC port
        grpc_port: u16,
        /// Bound WebSocket port
        websocket_port: u16,
    },
    /// Startup failed before the server was serving
    Error(StartupError),
}

impl StartupOutcome {
    /// Encode the outcome as a single handshake line (including the newline)
    pub fn encode_line(&self) -> Result<String, ProtocolError> {
        let payload = bincode::serialize(self)?;
        let mut line = BASE64.encode(payload);
        line.push('\n');
        Ok(line)
    }

    /// Decode an outcome from a handshake line
    pub fn decode_line(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::TruncatedHandshake);
        }
        let payload = BASE64.decode(trimmed)?;
        Ok(bincode::deserialize(&payload)?)
    }
}

/// Write the outcome to the FIFO at `path`.
///
/// Opening a FIFO for writing blocks until the reader end is open, so this
/// runs the write on a blocking thread.
pub async fn write_outcome(path: &Path, outcome: &StartupOutcome) -> Result<(), ProtocolError> {
    let line = outcome.encode_line()?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), ProtocolError> {
        let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::other(e))??;
    Ok(())
}

/// Block until the child writes its single handshake line, then return the
/// bound `(grpc_port, websocket_port)` pair.
///
/// An error outcome from the child is re-raised here as
/// [`ProtocolError::Startup`].
pub async fn read_ports(path: &Path) -> Result<(u16, u16), ProtocolError> {
    let outcome = read_outcome(path).await?;
    match outcome {
        StartupOutcome::Ports {
            grpc_port,
            websocket_port,
        } => Ok((grpc_port, websocket_port)),
        StartupOutcome::Error(error) => Err(ProtocolError::Startup(error)),
    }
}

/// Block until the child writes its single handshake line and decode it.
pub async fn read_outcome(path: &Path) -> Result<StartupOutcome, ProtocolError> {
    let path: PathBuf = path.to_path_buf();
    let line = tokio::task::spawn_blocking(move || -> Result<String, ProtocolError> {
        // Opening a FIFO for reading blocks until a writer appears; that is
        // exactly the handshake semantics we want.
        let file = std::fs::File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        Ok(line)
    })
    .await
    .map_err(|e| std::io::Error::other(e))??;

    tracing::debug!("handshake line received ({} bytes)", line.len());
    StartupOutcome::decode_line(&line)
}
