//! Backend-agnostic reconciliation driver
//!
//! [`ConsensusManager`] holds the manager's view of the consensuses that
//! currently exist and reconciles it against each newly planned list. The
//! backend only ever sees one consensus at a time (plus the optional
//! whole-plan hooks); the diffing is done here, once, for every backend.

use std::collections::HashMap;

use async_trait::async_trait;

use keel_core::{Consensus, ConsensusAddress, ConsensusDescriptor, KeelError};
use keel_protocol::ConsensusId;

/// One reconciliation backend: how consensuses come into and go out of
/// existence on some substrate.
///
/// `set_consensus` must be idempotent: applying an unchanged spec returns
/// the same address without disturbing the running consensus.
#[async_trait]
pub trait ConsensusBackend: Send {
    /// Inspect and validate the whole planned list before any per-consensus
    /// work happens. A failure here aborts the reconciliation with reality
    /// untouched.
    async fn prepare(&mut self, _planned: &[Consensus]) -> Result<(), KeelError> {
        Ok(())
    }

    /// Bring one consensus into existence (or confirm it already matches)
    /// and return the address it serves on.
    async fn set_consensus(&mut self, consensus: &Consensus) -> Result<ConsensusAddress, KeelError>;

    /// Tear one consensus down
    async fn delete_consensus(&mut self, consensus: &Consensus) -> Result<(), KeelError>;

    /// Run after the plan has been fully applied, when the surviving set of
    /// consensuses is known.
    async fn finalize(&mut self) -> Result<(), KeelError> {
        Ok(())
    }
}

/// The reconciliation driver over some [`ConsensusBackend`]
pub struct ConsensusManager<B> {
    backend: B,
    current_consensuses: HashMap<ConsensusId, Consensus>,
}

impl<B: ConsensusBackend> ConsensusManager<B> {
    /// Create a manager that believes no consensuses exist yet
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            current_consensuses: HashMap::new(),
        }
    }

    /// Reconcile reality against `planned`.
    ///
    /// Every planned consensus is (idempotently) applied, every currently
    /// known consensus absent from the plan is deleted, and the manager's
    /// view is replaced by the plan. Returns one descriptor per planned
    /// consensus, in plan order.
    pub async fn set_consensuses(
        &mut self,
        planned: &[Consensus],
    ) -> Result<Vec<ConsensusDescriptor>, KeelError> {
        self.backend.prepare(planned).await?;

        let mut descriptors = Vec::with_capacity(planned.len());
        for consensus in planned {
            let address = self.backend.set_consensus(consensus).await?;
            descriptors.push(ConsensusDescriptor {
                id: consensus.id.clone(),
                application_id: consensus.application_id.clone(),
                address,
                namespace: consensus.namespace.clone(),
            });
        }

        for (id, consensus) in &self.current_consensuses {
            if !planned.iter().any(|planned| planned.id == *id) {
                self.backend.delete_consensus(consensus).await?;
            }
        }

        self.current_consensuses = planned
            .iter()
            .map(|consensus| (consensus.id.clone(), consensus.clone()))
            .collect();

        self.backend.finalize().await?;

        Ok(descriptors)
    }

    /// The consensuses the manager currently believes exist
    pub fn current_consensuses(&self) -> &HashMap<ConsensusId, Consensus> {
        &self.current_consensuses
    }

    /// Shared access to the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Exclusive access to the backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
