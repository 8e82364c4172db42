//! Local reverse proxy boundary
//!
//! Local deployments are fronted by a locally-run reverse proxy that routes
//! incoming traffic to the correct consensus process by address. The proxy
//! implementation is external; the local manager constructs one through a
//! factory after every topology change and pushes the full routing table
//! into it.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;

use crate::types::ConsensusAddress;
use keel_protocol::{ApplicationId, ConsensusId, ServiceName};

/// Configuration a new proxy instance is constructed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Port the proxy listens on
    pub listener_port: u16,
    /// Application whose consensuses are routed
    pub application_id: ApplicationId,
    /// Services the proxy routes: the fronted serviceables plus the
    /// manager's built-in system routes
    pub routables: Vec<ServiceName>,
    /// Consensuses currently stopped; the proxy marks these unreachable
    /// instead of silently dropping or blindly retrying them
    pub stopped_consensuses: HashSet<ConsensusId>,
}

/// A local reverse proxy instance
#[async_trait]
pub trait LocalEnvoy: Send + Sync {
    /// Start the proxy
    async fn start(&mut self) -> Result<()>;

    /// Stop the proxy
    async fn stop(&mut self) -> Result<()>;

    /// Replace the proxy's routing table with the given address map. The
    /// table is always fully replaced, never patched incrementally.
    async fn set_consensuses(
        &mut self,
        address_by_consensus: &HashMap<ConsensusId, ConsensusAddress>,
    ) -> Result<()>;
}

/// Creates proxy instances
pub trait LocalEnvoyFactory: Send + Sync {
    /// Create a new, not-yet-started proxy
    fn create(&self, config: ProxyConfig) -> Result<Box<dyn LocalEnvoy>>;
}
