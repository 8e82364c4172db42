//! Naming conventions for the Kubernetes objects backing a consensus

use keel_protocol::{ApplicationId, ConsensusId};

/// Name of the Deployment (and its PersistentVolumeClaim) for a consensus
pub fn deployment_name(consensus_id: &ConsensusId) -> String {
    consensus_id.as_str().to_string()
}

/// Name of the Service for a consensus
pub fn service_name(consensus_id: &ConsensusId) -> String {
    consensus_id.as_str().to_string()
}

/// Name of the transcoding proxy-filter resource for a consensus
pub fn transcoding_filter_name(consensus_id: &ConsensusId) -> String {
    format!("{consensus_id}-transcoding-filter")
}

/// Name of the per-application service account consensus pods run as
pub fn service_account_name(application_id: &ApplicationId) -> String {
    format!("{application_id}-service-account")
}

/// In-cluster DNS name of a Service
pub fn cluster_dns_name(service_name: &str, namespace: &str) -> String {
    format!("{service_name}.{namespace}.svc.cluster.local")
}
