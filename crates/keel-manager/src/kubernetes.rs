//! Kubernetes reconciliation backend
//!
//! Each consensus becomes four cluster objects, created in dependency order:
//! a PersistentVolumeClaim for the storage engine, a single-replica
//! Deployment running the application container, a transcoding proxy-filter
//! custom resource, and a Service exposing the well-known ports. Deletion
//! walks the same objects in reverse.

use std::collections::BTreeMap;

use async_trait::async_trait;

use keel_core::traits::{
    AccessMode, ClusterClient, DeploymentSpec, DynamicVolumeMount, EnvVar,
    PersistentVolumeClaimSpec, ServicePort, ServiceSpec, TranscodingFilterSpec, UpdateStrategy,
};
use keel_core::{naming, settings, Consensus, ConsensusAddress, InputError, KeelError};

use crate::manager::{ConsensusBackend, ConsensusManager};

/// Consensus manager deploying onto a Kubernetes cluster
pub type KubernetesConsensusManager = ConsensusManager<KubernetesBackend>;

/// Reconciliation backend for a Kubernetes cluster
pub struct KubernetesBackend {
    client: Box<dyn ClusterClient>,
}

impl KubernetesBackend {
    /// Create a backend over the given cluster client
    pub fn new(client: Box<dyn ClusterClient>) -> Self {
        Self { client }
    }

    fn pod_labels(consensus: &Consensus) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                settings::IS_CONSENSUS_LABEL_NAME.to_string(),
                settings::IS_CONSENSUS_LABEL_VALUE.to_string(),
            ),
            (
                settings::CONSENSUS_ID_LABEL_NAME.to_string(),
                consensus.id.as_str().to_string(),
            ),
        ])
    }

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        consensus: &Consensus,
    ) -> Result<(), KeelError> {
        self.client
            .create_or_update_persistent_volume_claim(PersistentVolumeClaimSpec {
                namespace: namespace.to_string(),
                name: naming::deployment_name(&consensus.id),
                storage_class_name: settings::STORAGE_CLASS_NAME.to_string(),
                storage_request: settings::STORAGE_REQUEST.to_string(),
                access_modes: vec![AccessMode::ReadWriteOnce],
            })
            .await?;
        Ok(())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        consensus: &Consensus,
    ) -> Result<(), KeelError> {
        let container_image_name = consensus.container_image_name.as_deref().ok_or_else(|| {
            InputError::new(format!(
                "consensus '{}' has no container image and cannot be deployed on Kubernetes",
                consensus.id
            ))
        })?;

        self.client
            .create_or_update_deployment(DeploymentSpec {
                namespace: namespace.to_string(),
                name: naming::deployment_name(&consensus.id),
                container_image_name: container_image_name.to_string(),
                // The state directory is on a ReadWriteOnce volume; exactly
                // one pod may use it at a time.
                replicas: 1,
                exposed_ports: vec![
                    settings::USER_CONTAINER_GRPC_PORT,
                    settings::USER_CONTAINER_WEBSOCKET_PORT,
                ],
                pod_labels: Self::pod_labels(consensus),
                service_account_name: naming::service_account_name(&consensus.application_id),
                // Recreate, for the same reason as replicas=1: the outgoing
                // pod must release the volume before its successor starts.
                update_strategy: UpdateStrategy::Recreate,
                env: vec![
                    EnvVar::new(
                        settings::ENVVAR_APPLICATION_ID,
                        consensus.application_id.as_str(),
                    ),
                    EnvVar::new(settings::ENVVAR_CONSENSUS_ID, consensus.id.as_str()),
                    EnvVar::new(settings::ENVVAR_CLOUD_VERSION, settings::CLOUD_PROTOCOL_VERSION),
                    EnvVar::new(
                        settings::ENVVAR_PORT,
                        settings::USER_CONTAINER_GRPC_PORT.to_string(),
                    ),
                    EnvVar::new(settings::ENVVAR_UNBUFFERED, "1"),
                    EnvVar::new(
                        settings::ENVVAR_STATE_DIRECTORY,
                        settings::CONTAINER_STATE_DIRECTORY,
                    ),
                ],
                volumes: vec![DynamicVolumeMount {
                    persistent_volume_claim_name: naming::deployment_name(&consensus.id),
                    mount_path: settings::CONTAINER_STATE_DIRECTORY.to_string(),
                }],
            })
            .await?;
        Ok(())
    }

    async fn create_transcoding_filter(
        &self,
        namespace: &str,
        consensus: &Consensus,
    ) -> Result<(), KeelError> {
        self.client
            .create_or_update_transcoding_filter(TranscodingFilterSpec {
                namespace: namespace.to_string(),
                name: naming::transcoding_filter_name(&consensus.id),
                target_labels: Self::pod_labels(consensus),
                services: consensus.service_names.clone(),
                file_descriptor_set: consensus.file_descriptor_set.clone(),
            })
            .await?;
        Ok(())
    }

    async fn create_service(
        &self,
        namespace: &str,
        consensus: &Consensus,
    ) -> Result<(), KeelError> {
        self.client
            .create_or_update_service(ServiceSpec {
                namespace: namespace.to_string(),
                name: naming::service_name(&consensus.id),
                deployment_label: naming::deployment_name(&consensus.id),
                ports: vec![
                    ServicePort {
                        port: settings::USER_CONTAINER_GRPC_PORT,
                        name: settings::GRPC_PORT_NAME.to_string(),
                    },
                    ServicePort {
                        port: settings::USER_CONTAINER_WEBSOCKET_PORT,
                        name: settings::WEBSOCKET_PORT_NAME.to_string(),
                    },
                ],
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConsensusBackend for KubernetesBackend {
    async fn set_consensus(
        &mut self,
        consensus: &Consensus,
    ) -> Result<ConsensusAddress, KeelError> {
        let namespace = consensus.namespace.as_deref().ok_or_else(|| {
            InputError::new(format!(
                "consensus '{}' has no namespace and cannot be deployed on Kubernetes",
                consensus.id
            ))
        })?;

        self.create_persistent_volume_claim(namespace, consensus)
            .await?;
        self.create_deployment(namespace, consensus).await?;
        self.create_transcoding_filter(namespace, consensus).await?;
        self.create_service(namespace, consensus).await?;

        Ok(ConsensusAddress::new(
            naming::cluster_dns_name(&naming::service_name(&consensus.id), namespace),
            settings::USER_CONTAINER_GRPC_PORT,
            settings::USER_CONTAINER_WEBSOCKET_PORT,
        ))
    }

    async fn delete_consensus(&mut self, consensus: &Consensus) -> Result<(), KeelError> {
        let namespace = consensus.namespace.as_deref().ok_or_else(|| {
            InputError::new(format!(
                "consensus '{}' has no namespace and cannot be deleted from Kubernetes",
                consensus.id
            ))
        })?;

        self.client
            .delete_service(namespace, &naming::service_name(&consensus.id))
            .await?;
        self.client
            .delete_deployment(namespace, &naming::deployment_name(&consensus.id))
            .await?;
        self.client
            .delete_persistent_volume_claim(namespace, &naming::deployment_name(&consensus.id))
            .await?;
        Ok(())
    }
}
