//! Trait seams for Keel's external collaborators
//!
//! The Kubernetes API client, the consensus runtime (server, resolver,
//! state manager), and the local reverse proxy are external to Keel; these
//! traits specify them at their interface boundary so the managers can be
//! exercised against fakes.

mod cluster;
mod proxy;
mod runtime;

pub use cluster::{
    AccessMode, ClusterClient, DeploymentSpec, DynamicVolumeMount, EnvVar,
    PersistentVolumeClaimSpec, ServicePort, ServiceSpec, TranscodingFilterSpec, UpdateStrategy,
};
pub use proxy::{LocalEnvoy, LocalEnvoyFactory, ProxyConfig};
pub use runtime::{
    ConsensusRuntime, ConsensusServer, Resolver, ServerConfig, Serviceable, StateManager,
    TokenVerifier,
};
