//! A locally launched consensus and its teardown

use std::sync::Arc;

use keel_core::traits::{ConsensusServer, Resolver, StateManager};
use keel_core::{Consensus, ConsensusAddress, KeelError};

use super::subprocess::SubprocessHandle;

/// How a local consensus is (or was) being hosted
pub enum LaunchedState {
    /// Hosted by servers running inside this process
    InProcess {
        server: Arc<dyn ConsensusServer>,
        resolver: Arc<dyn Resolver>,
        state_manager: Arc<dyn StateManager>,
    },
    /// Hosted by a supervised OS subprocess
    Subprocess(SubprocessHandle),
    /// Stopped; the spec and last address are retained so the consensus can
    /// be restarted and so the proxy can mark it unreachable.
    Stopped,
}

/// One consensus the local backend has launched
pub struct LaunchedConsensus {
    /// The spec this consensus was launched from
    pub consensus: Consensus,
    /// Address the consensus serves (or last served) on
    pub address: ConsensusAddress,
    state: LaunchedState,
}

impl LaunchedConsensus {
    pub fn new(consensus: Consensus, address: ConsensusAddress, state: LaunchedState) -> Self {
        Self {
            consensus,
            address,
            state,
        }
    }

    pub fn stopped(&self) -> bool {
        matches!(self.state, LaunchedState::Stopped)
    }

    /// Stop whatever is hosting this consensus and release its resources.
    ///
    /// The state manager in particular must be fully shut down before this
    /// returns, so that a replacement instance can immediately open the same
    /// directory.
    pub async fn stop(&mut self) -> Result<(), KeelError> {
        match std::mem::replace(&mut self.state, LaunchedState::Stopped) {
            LaunchedState::InProcess {
                server,
                resolver,
                state_manager,
            } => {
                server.stop().await?;
                server.wait().await?;
                resolver.stop().await?;
                state_manager.shutdown_and_wait().await?;
            }
            LaunchedState::Subprocess(handle) => {
                handle.stop().await?;
            }
            LaunchedState::Stopped => {}
        }
        Ok(())
    }
}
