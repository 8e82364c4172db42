//! Consensus reconciliation engine
//!
//! A consensus manager owns the full lifecycle of an application's
//! consensuses: given the planner's desired list, it makes reality match by
//! creating what is missing, leaving unchanged consensuses alone, and
//! tearing down what is no longer planned.
//!
//! The reconciliation loop itself is backend-agnostic; the backends differ
//! in what "making reality match" means:
//!
//! - [`KubernetesBackend`] drives a cluster through the
//!   [`ClusterClient`](keel_core::traits::ClusterClient) boundary,
//! - [`LocalBackend`] launches consensuses as in-process servers or
//!   supervised OS subprocesses behind a local reverse proxy,
//! - [`FakeBackend`] assigns deterministic fake addresses for tests.

pub mod fake;
pub mod kubernetes;
pub mod local;
pub mod manager;

pub use fake::{FakeBackend, FakeConsensusManager};
pub use kubernetes::{KubernetesBackend, KubernetesConsensusManager};
pub use local::{
    FailFast, LocalBackend, LocalConsensusManager, LocalManagerOptions, ServiceableRegistration,
    WorkerCommand,
};
pub use manager::{ConsensusBackend, ConsensusManager};
