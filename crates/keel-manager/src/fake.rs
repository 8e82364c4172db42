//! Fake reconciliation backend for tests
//!
//! Hands out deterministic addresses without touching any real substrate:
//! the first consensus ever seen gets port 1337, the next 1338, and so on.
//! An already-known consensus keeps its port, and ports of deleted
//! consensuses are never reused, so addresses stay stable and unambiguous
//! for the lifetime of the backend.

use std::collections::HashMap;

use async_trait::async_trait;

use keel_core::{Consensus, ConsensusAddress, KeelError};
use keel_protocol::ConsensusId;

use crate::manager::{ConsensusBackend, ConsensusManager};

/// Consensus manager over the fake backend
pub type FakeConsensusManager = ConsensusManager<FakeBackend>;

/// Port assigned to the first consensus
pub const FIRST_PORT: u16 = 1337;

/// Fake hostname a consensus is "reachable" on
pub fn hostname_for_consensus(consensus_id: &ConsensusId) -> String {
    format!("hostname-for-{consensus_id}")
}

/// Reconciliation backend that only pretends
#[derive(Debug, Default)]
pub struct FakeBackend {
    port_by_consensus_id: HashMap<ConsensusId, u16>,
    ports_assigned: u16,
}

impl FakeBackend {
    /// Create a fresh fake backend
    pub fn new() -> Self {
        Self::default()
    }

    /// The address the given consensus is (or would be) assigned
    pub fn address_for_consensus(&mut self, consensus_id: &ConsensusId) -> ConsensusAddress {
        let next_port = FIRST_PORT + self.ports_assigned;
        let port = *self
            .port_by_consensus_id
            .entry(consensus_id.clone())
            .or_insert(next_port);
        if port == next_port {
            self.ports_assigned += 1;
        }
        ConsensusAddress::new(hostname_for_consensus(consensus_id), port, port)
    }
}

#[async_trait]
impl ConsensusBackend for FakeBackend {
    async fn set_consensus(
        &mut self,
        consensus: &Consensus,
    ) -> Result<ConsensusAddress, KeelError> {
        Ok(self.address_for_consensus(&consensus.id))
    }

    async fn delete_consensus(&mut self, consensus: &Consensus) -> Result<(), KeelError> {
        // The port mapping is dropped but the port itself is never handed
        // out again.
        self.port_by_consensus_id.remove(&consensus.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use keel_protocol::ApplicationId;

    fn consensus(id: &str) -> Consensus {
        Consensus {
            id: ConsensusId::new(id),
            application_id: ApplicationId::new("app"),
            namespace: None,
            container_image_name: None,
            shards: vec![],
            service_names: vec![],
            file_descriptor_set: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_addresses_are_deterministic() {
        let mut manager = FakeConsensusManager::new(FakeBackend::new());
        let descriptors = manager
            .set_consensuses(&[consensus("a"), consensus("b")])
            .await
            .unwrap();

        assert_eq!(
            descriptors[0].address,
            ConsensusAddress::new("hostname-for-a", 1337, 1337)
        );
        assert_eq!(
            descriptors[1].address,
            ConsensusAddress::new("hostname-for-b", 1338, 1338)
        );
    }

    #[tokio::test]
    async fn test_known_consensus_keeps_its_port() {
        let mut manager = FakeConsensusManager::new(FakeBackend::new());
        manager
            .set_consensuses(&[consensus("a"), consensus("b")])
            .await
            .unwrap();
        let descriptors = manager
            .set_consensuses(&[consensus("b"), consensus("a")])
            .await
            .unwrap();

        assert_eq!(descriptors[0].address.grpc_port, 1338);
        assert_eq!(descriptors[1].address.grpc_port, 1337);
    }

    #[tokio::test]
    async fn test_deleted_ports_are_not_reused() {
        let mut manager = FakeConsensusManager::new(FakeBackend::new());
        manager.set_consensuses(&[consensus("a")]).await.unwrap();
        manager.set_consensuses(&[]).await.unwrap();

        let descriptors = manager.set_consensuses(&[consensus("b")]).await.unwrap();
        assert_eq!(descriptors[0].address.grpc_port, 1338);

        // Even "a" itself comes back on a fresh port.
        let descriptors = manager
            .set_consensuses(&[consensus("b"), consensus("a")])
            .await
            .unwrap();
        assert_eq!(descriptors[1].address.grpc_port, 1339);
    }
}
