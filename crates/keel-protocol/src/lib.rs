//! keel-protocol: Wire types for Keel consensus launch and handshake
//!
//! This crate defines everything that crosses a process boundary when a
//! consensus is launched out-of-band: the serialized launch arguments passed
//! to the child through the environment, and the one-shot FIFO handshake the
//! child uses to report its bound ports (or a structured startup failure)
//! back to its launcher.

pub mod error;
pub mod fifo;
pub mod handshake;
pub mod launch;
pub mod types;

pub use error::ProtocolError;
pub use handshake::{StartupError, StartupOutcome};
pub use launch::{LaunchArgs, ENVVAR_LAUNCH_ARGS};
pub use types::{ApplicationId, ConsensusId, EffectValidation, ServiceName, ShardInfo};
