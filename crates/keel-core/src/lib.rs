//! keel-core: Core types, traits, and configuration for Keel
//!
//! This crate provides the domain model (consensuses and their addresses),
//! the error taxonomy, the load-bearing constants, and the trait seams
//! behind which Keel's external collaborators live: the Kubernetes cluster
//! client, the consensus runtime (server, resolver, state manager), and the
//! local reverse proxy.

pub mod config;
pub mod error;
pub mod naming;
pub mod settings;
pub mod traits;
pub mod types;

pub use error::{InputError, KeelError};
pub use types::{Consensus, ConsensusAddress, ConsensusDescriptor};
