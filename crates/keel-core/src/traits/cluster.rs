//! Kubernetes cluster client boundary
//!
//! The manager describes every object it wants field-for-field; the client
//! is responsible for talking to the API server. `create_or_update` calls
//! are idempotent: applying an unchanged spec is a no-op on the cluster.
//! Failures are not wrapped; they propagate to the reconciliation caller.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use keel_protocol::ServiceName;

/// Access mode of a persistent volume claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Mountable read-write by a single node
    ReadWriteOnce,
}

/// Update strategy of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Kill all old pods before bringing up new ones
    Recreate,
    /// Replace pods incrementally
    RollingUpdate,
}

/// One environment variable for a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

impl EnvVar {
    /// Create a new environment variable
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A persistent volume claim mounted into a pod at a fixed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicVolumeMount {
    /// Name of the claim to mount
    pub persistent_volume_claim_name: String,
    /// Mount path inside the container
    pub mount_path: String,
}

/// Desired state of a persistent volume claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentVolumeClaimSpec {
    /// Namespace of the claim
    pub namespace: String,
    /// Name of the claim
    pub name: String,
    /// Storage class to allocate from
    pub storage_class_name: String,
    /// Requested capacity, e.g. "10Gi"
    pub storage_request: String,
    /// Requested access modes
    pub access_modes: Vec<AccessMode>,
}

/// Desired state of a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSpec {
    /// Namespace of the deployment
    pub namespace: String,
    /// Name of the deployment
    pub name: String,
    /// Container image to run
    pub container_image_name: String,
    /// Number of replicas
    pub replicas: u32,
    /// Container ports to expose
    pub exposed_ports: Vec<u16>,
    /// Labels applied to the pods
    pub pod_labels: BTreeMap<String, String>,
    /// Service account the pods run as
    pub service_account_name: String,
    /// Update strategy
    pub update_strategy: UpdateStrategy,
    /// Container environment
    pub env: Vec<EnvVar>,
    /// Claims mounted into the pods
    pub volumes: Vec<DynamicVolumeMount>,
}

/// One named service port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    /// Port number
    pub port: u16,
    /// Port name
    pub name: String,
}

/// Desired state of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Namespace of the service
    pub namespace: String,
    /// Name of the service
    pub name: String,
    /// Deployment label the service selects on
    pub deployment_label: String,
    /// Ports the service exposes
    pub ports: Vec<ServicePort>,
}

/// Desired state of the transcoding proxy-filter custom resource that
/// instructs a consensus's sidecar proxy to transcode incoming HTTP traffic
/// to gRPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodingFilterSpec {
    /// Namespace of the filter
    pub namespace: String,
    /// Name of the filter
    pub name: String,
    /// Pod labels the filter targets
    pub target_labels: BTreeMap<String, String>,
    /// Services to transcode
    pub services: Vec<ServiceName>,
    /// Serialized API descriptor set the transcoder works from
    pub file_descriptor_set: Bytes,
}

/// Client for the Kubernetes objects Keel manages
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create or update a persistent volume claim
    async fn create_or_update_persistent_volume_claim(
        &self,
        spec: PersistentVolumeClaimSpec,
    ) -> Result<()>;

    /// Create or update a deployment
    async fn create_or_update_deployment(&self, spec: DeploymentSpec) -> Result<()>;

    /// Create or update a transcoding proxy-filter custom resource
    async fn create_or_update_transcoding_filter(&self, spec: TranscodingFilterSpec)
        -> Result<()>;

    /// Create or update a service
    async fn create_or_update_service(&self, spec: ServiceSpec) -> Result<()>;

    /// Delete a service
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    /// Delete a deployment
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    /// Delete a persistent volume claim
    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()>;
}
