//! Consensus runtime boundary
//!
//! A running consensus is three collaborating pieces: a resolver (routes
//! derived from the placement planner), a state manager (the storage engine
//! scoped to the consensus's shards), and the server that actually serves
//! traffic. All three are external to Keel; the managers only start, stop,
//! and wire them together.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use keel_protocol::{ApplicationId, ConsensusId, EffectValidation, ServiceName, ShardInfo};

/// A named service that can be hosted inside a consensus
pub trait Serviceable: Send + Sync {
    /// Fully qualified names of the services this serviceable exposes
    fn service_names(&self) -> Vec<ServiceName>;
}

/// Verifies bearer tokens on behalf of a consensus server
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Whether the given token is valid
    async fn verify_token(&self, token: &str) -> bool;
}

/// A started resolver feeding actor routes to a server
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Stop the resolver
    async fn stop(&self) -> Result<()>;
}

/// A storage engine scoped to one consensus's shards.
///
/// Must be shut down explicitly so another instance can be brought up
/// immediately for the same consensus (for example on a restart) without
/// conflict.
#[async_trait]
pub trait StateManager: Send + Sync {
    /// Shut the state manager down and wait until its resources are released
    async fn shutdown_and_wait(&self) -> Result<()>;
}

/// A running consensus server
#[async_trait]
pub trait ConsensusServer: Send + Sync {
    /// Port the server bound for gRPC traffic
    fn grpc_port(&self) -> u16;

    /// Port the server bound for WebSocket traffic
    fn websocket_port(&self) -> u16;

    /// Block until the server is told to stop
    async fn wait(&self) -> Result<()>;

    /// Tell the server to stop serving
    async fn stop(&self) -> Result<()>;
}

/// Everything a [`ConsensusRuntime`] needs to start a server
pub struct ServerConfig {
    /// Application the consensus belongs to
    pub application_id: ApplicationId,
    /// Identity of the consensus
    pub consensus_id: ConsensusId,
    /// Serviceables hosted by the server
    pub serviceables: Vec<Arc<dyn Serviceable>>,
    /// Address to bind; port 0 lets the OS assign one
    pub listen_address: String,
    /// Optional token verifier for incoming requests
    pub token_verifier: Option<Arc<dyn TokenVerifier>>,
    /// Resolver the server consults for actor routes
    pub resolver: Arc<dyn Resolver>,
    /// Storage engine for the consensus's shards
    pub state_manager: Arc<dyn StateManager>,
    /// Serialized API descriptor set for transcoding
    pub file_descriptor_set: Bytes,
    /// Effect validation mode
    pub effect_validation: EffectValidation,
    /// Secret authenticating consensuses of the same application to one
    /// another
    pub app_internal_api_key_secret: String,
}

/// Factory for the three runtime pieces of a consensus
#[async_trait]
pub trait ConsensusRuntime: Send + Sync {
    /// Create and start a resolver bound to the placement planner at the
    /// given address.
    async fn start_resolver(&self, placement_planner_address: &str) -> Result<Arc<dyn Resolver>>;

    /// Open the storage engine for a consensus's shards in `directory`
    async fn open_state_manager(
        &self,
        directory: &Path,
        shards: &[ShardInfo],
        serviceables: &[Arc<dyn Serviceable>],
    ) -> Result<Arc<dyn StateManager>>;

    /// Create and start a server; on return the server is bound and serving
    async fn start_server(&self, config: ServerConfig) -> Result<Arc<dyn ConsensusServer>>;
}
