//! Serialized launch arguments for a subprocess consensus
//!
//! The launcher passes everything the child needs through a single
//! environment variable: the JSON encoding of [`LaunchArgs`], wrapped in
//! Base64 so the value survives any shell or process-spawn quoting. An
//! OS-level channel is used deliberately; nothing is shared through memory.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{ApplicationId, ConsensusId, EffectValidation, ShardInfo};

/// Name of the environment variable carrying the Base64-encoded launch
/// arguments.
pub const ENVVAR_LAUNCH_ARGS: &str = "KEEL_CONSENSUS_BASE64_ARGS";

/// Everything a consensus child process needs to start serving
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchArgs {
    /// Application this consensus belongs to
    pub application_id: ApplicationId,
    /// Identity of this consensus
    pub consensus_id: ConsensusId,
    /// Shards this consensus serves
    pub shards: Vec<ShardInfo>,
    /// State directory for this consensus's storage engine
    pub directory: PathBuf,
    /// Address to bind, with port 0 so the OS assigns one
    pub address: String,
    /// Address of the placement planner to resolve against
    pub placement_planner_address: String,
    /// Path of the FIFO to report the startup outcome to
    pub fifo: PathBuf,
    /// Serialized API descriptor set for transcoding
    pub file_descriptor_set: Bytes,
    /// Effect validation mode for the server
    pub effect_validation: EffectValidation,
    /// Secret shared by all consensuses of this application, used for
    /// inter-consensus authentication
    pub app_internal_api_key_secret: String,
}

impl LaunchArgs {
    /// Encode the arguments as an environment variable value
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let json = serde_json::to_vec(self)?;
        Ok(BASE64.encode(json))
    }

    /// Decode arguments from an environment variable value
    pub fn decode(value: &str) -> Result<Self, ProtocolError> {
        let json = BASE64.decode(value.trim())?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Decode arguments from the [`ENVVAR_LAUNCH_ARGS`] environment variable
    /// of the current process.
    pub fn from_env() -> Result<Self, ProtocolError> {
        let value = std::env::var(ENVVAR_LAUNCH_ARGS)
            .map_err(|_| ProtocolError::MissingEnvironment(ENVVAR_LAUNCH_ARGS))?;
        Self::decode(&value)
    }
}
