//! Core domain types

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use keel_protocol::{ApplicationId, ConsensusId, ServiceName, ShardInfo};

/// The desired spec of one consensus: an independently addressable,
/// deployed partition of an application's shards.
///
/// Immutable value; two `Consensus` values with the same id and equal fields
/// describe the same deployment, and reconciling an unchanged spec is a
/// no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consensus {
    /// Identity of this consensus
    pub id: ConsensusId,
    /// Application this consensus belongs to
    pub application_id: ApplicationId,
    /// Kubernetes namespace to deploy into (required on Kubernetes)
    pub namespace: Option<String>,
    /// Container image to run (required on Kubernetes)
    pub container_image_name: Option<String>,
    /// Shards served by this consensus; all of them are served by exactly
    /// one runtime instance
    pub shards: Vec<ShardInfo>,
    /// Services exposed by this consensus
    pub service_names: Vec<ServiceName>,
    /// Serialized API descriptor set, used for HTTP-to-gRPC transcoding
    pub file_descriptor_set: Bytes,
}

/// Network address of a running consensus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusAddress {
    /// Host the consensus is reachable on
    pub host: String,
    /// Port serving gRPC traffic
    pub grpc_port: u16,
    /// Port serving WebSocket traffic
    pub websocket_port: u16,
}

impl ConsensusAddress {
    /// Create a new address
    pub fn new(host: impl Into<String>, grpc_port: u16, websocket_port: u16) -> Self {
        Self {
            host: host.into(),
            grpc_port,
            websocket_port,
        }
    }
}

impl fmt::Display for ConsensusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.grpc_port)
    }
}

/// What `set_consensuses` returns for each planned consensus: its identity
/// plus where it is now reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusDescriptor {
    /// Identity of the consensus
    pub id: ConsensusId,
    /// Application the consensus belongs to
    pub application_id: ApplicationId,
    /// Address the consensus serves on
    pub address: ConsensusAddress,
    /// Kubernetes namespace, when deployed on a cluster
    pub namespace: Option<String>,
}
