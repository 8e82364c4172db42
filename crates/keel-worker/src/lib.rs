//! Entry point for a consensus hosted in its own OS process
//!
//! A worker binary links the application's serviceables and a
//! [`ConsensusRuntime`], then hands control to [`run_from_env`]. Everything
//! else - decoding the launch arguments, bringing up the resolver, state
//! manager, and server, reporting the bound ports (or the startup failure)
//! back to the launcher over the FIFO, and tearing everything down on
//! SIGTERM - happens here.

use std::sync::Arc;

use keel_core::traits::{ConsensusRuntime, ConsensusServer, Resolver, ServerConfig, Serviceable, StateManager};
use keel_core::KeelError;
use keel_protocol::handshake::{self, StartupError, StartupOutcome};
use keel_protocol::LaunchArgs;

/// Install the process-wide tracing subscriber. The filter comes from
/// `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Decode the launch arguments from the environment and host the consensus
/// until it is told to stop.
pub async fn run_from_env(
    serviceables: Vec<Arc<dyn Serviceable>>,
    runtime: Arc<dyn ConsensusRuntime>,
) -> Result<(), KeelError> {
    let args = LaunchArgs::from_env()?;
    run_consensus_process(args, serviceables, runtime).await
}

/// Host one consensus for the lifetime of this process.
///
/// Exactly one outcome line is written to the launcher's FIFO: the bound
/// ports once the server is serving, or the startup failure. After a
/// successful start this returns only when the server stops or the process
/// receives SIGTERM.
pub async fn run_consensus_process(
    args: LaunchArgs,
    serviceables: Vec<Arc<dyn Serviceable>>,
    runtime: Arc<dyn ConsensusRuntime>,
) -> Result<(), KeelError> {
    let running = match start(&args, serviceables, &runtime).await {
        Ok(running) => running,
        Err(error) => {
            let startup =
                StartupError::new(format!("Failed to start consensus {}", args.consensus_id))
                    // The trace cannot cross the process boundary as a
                    // value, so it travels as a string.
                    .with_stack_trace(format!("{error:?}"));
            handshake::write_outcome(&args.fifo, &StartupOutcome::Error(startup.clone())).await?;
            return Err(KeelError::Input(startup.into()));
        }
    };

    handshake::write_outcome(
        &args.fifo,
        &StartupOutcome::Ports {
            grpc_port: running.server.grpc_port(),
            websocket_port: running.server.websocket_port(),
        },
    )
    .await?;
    tracing::info!(
        "consensus '{}' serving on ports {}/{}",
        args.consensus_id,
        running.server.grpc_port(),
        running.server.websocket_port()
    );

    let served = wait_until_stopped(&running).await;

    // Best-effort teardown; a failing piece must not keep the others from
    // releasing their resources.
    if let Err(error) = running.server.stop().await {
        tracing::warn!("failed to stop server: {error:#}");
    }
    if let Err(error) = running.state_manager.shutdown_and_wait().await {
        tracing::warn!("failed to shut down state manager: {error:#}");
    }
    if let Err(error) = running.resolver.stop().await {
        tracing::warn!("failed to stop resolver: {error:#}");
    }

    served?;
    Ok(())
}

struct RunningConsensus {
    server: Arc<dyn ConsensusServer>,
    resolver: Arc<dyn Resolver>,
    state_manager: Arc<dyn StateManager>,
}

async fn start(
    args: &LaunchArgs,
    serviceables: Vec<Arc<dyn Serviceable>>,
    runtime: &Arc<dyn ConsensusRuntime>,
) -> anyhow::Result<RunningConsensus> {
    let resolver = runtime
        .start_resolver(&args.placement_planner_address)
        .await?;

    let state_manager = match runtime
        .open_state_manager(&args.directory, &args.shards, &serviceables)
        .await
    {
        Ok(state_manager) => state_manager,
        Err(error) => {
            let _ = resolver.stop().await;
            return Err(error);
        }
    };

    let server = match runtime
        .start_server(ServerConfig {
            application_id: args.application_id.clone(),
            consensus_id: args.consensus_id.clone(),
            serviceables,
            listen_address: args.address.clone(),
            // Tokens cannot be verified across the process boundary; a
            // worker that needs verification installs it in its runtime.
            token_verifier: None,
            resolver: Arc::clone(&resolver),
            state_manager: Arc::clone(&state_manager),
            file_descriptor_set: args.file_descriptor_set.clone(),
            effect_validation: args.effect_validation,
            app_internal_api_key_secret: args.app_internal_api_key_secret.clone(),
        })
        .await
    {
        Ok(server) => server,
        Err(error) => {
            let _ = state_manager.shutdown_and_wait().await;
            let _ = resolver.stop().await;
            return Err(error);
        }
    };

    Ok(RunningConsensus {
        server,
        resolver,
        state_manager,
    })
}

/// Block until the server stops on its own or the launcher asks us to stop
/// with SIGTERM.
#[cfg(unix)]
async fn wait_until_stopped(running: &RunningConsensus) -> Result<(), KeelError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        served = running.server.wait() => {
            served?;
        }
        _ = sigterm.recv() => {
            tracing::info!("terminate requested; shutting down");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_until_stopped(running: &RunningConsensus) -> Result<(), KeelError> {
    running.server.wait().await?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::path::{Path, PathBuf};

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;

    use keel_protocol::{
        fifo, ApplicationId, ConsensusId, EffectValidation, ProtocolError, ServiceName, ShardInfo,
    };

    struct FakeResolver;

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeStateManager;

    #[async_trait]
    impl StateManager for FakeStateManager {
        async fn shutdown_and_wait(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeServer;

    #[async_trait]
    impl ConsensusServer for FakeServer {
        fn grpc_port(&self) -> u16 {
            5001
        }

        fn websocket_port(&self) -> u16 {
            5002
        }

        async fn wait(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRuntime {
        fail_resolver: bool,
        fail_server: bool,
    }

    #[async_trait]
    impl ConsensusRuntime for FakeRuntime {
        async fn start_resolver(&self, _address: &str) -> Result<Arc<dyn Resolver>> {
            if self.fail_resolver {
                bail!("placement planner unreachable");
            }
            Ok(Arc::new(FakeResolver))
        }

        async fn open_state_manager(
            &self,
            _directory: &Path,
            _shards: &[ShardInfo],
            _serviceables: &[Arc<dyn Serviceable>],
        ) -> Result<Arc<dyn StateManager>> {
            Ok(Arc::new(FakeStateManager))
        }

        async fn start_server(&self, _config: ServerConfig) -> Result<Arc<dyn ConsensusServer>> {
            if self.fail_server {
                bail!("address already in use");
            }
            Ok(Arc::new(FakeServer))
        }
    }

    fn args(fifo_path: PathBuf, directory: PathBuf) -> LaunchArgs {
        LaunchArgs {
            application_id: ApplicationId::new("app"),
            consensus_id: ConsensusId::new("app-c0"),
            shards: vec![ShardInfo::new("shard-0", Bytes::new())],
            directory,
            address: "0.0.0.0:0".to_string(),
            placement_planner_address: "127.0.0.1:9999".to_string(),
            fifo: fifo_path,
            file_descriptor_set: Bytes::new(),
            effect_validation: EffectValidation::Enabled,
            app_internal_api_key_secret: "secret".to_string(),
        }
    }

    struct GreeterServiceable;

    impl Serviceable for GreeterServiceable {
        fn service_names(&self) -> Vec<ServiceName> {
            vec![ServiceName::new("demo.v1.Greeter")]
        }
    }

    #[tokio::test]
    async fn test_successful_run_reports_ports() {
        let dir = TempDir::new().unwrap();
        let fifo_path = dir.path().join("fifo");
        fifo::create(&fifo_path).unwrap();

        let worker_args = args(fifo_path.clone(), dir.path().join("state"));
        let worker = tokio::spawn(async move {
            run_consensus_process(
                worker_args,
                vec![Arc::new(GreeterServiceable)],
                Arc::new(FakeRuntime::default()),
            )
            .await
        });

        let (grpc_port, websocket_port) = handshake::read_ports(&fifo_path).await.unwrap();
        assert_eq!((grpc_port, websocket_port), (5001, 5002));

        // The fake server's wait returns immediately, so the worker run
        // completes (including teardown) without an external stop.
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_reports_error_over_fifo() {
        let dir = TempDir::new().unwrap();
        let fifo_path = dir.path().join("fifo");
        fifo::create(&fifo_path).unwrap();

        let worker_args = args(fifo_path.clone(), dir.path().join("state"));
        let worker = tokio::spawn(async move {
            run_consensus_process(
                worker_args,
                vec![Arc::new(GreeterServiceable)],
                Arc::new(FakeRuntime {
                    fail_resolver: true,
                    ..Default::default()
                }),
            )
            .await
        });

        match handshake::read_ports(&fifo_path).await {
            Err(ProtocolError::Startup(error)) => {
                assert_eq!(error.reason, "Failed to start consensus app-c0");
                assert!(error
                    .stack_trace
                    .as_deref()
                    .unwrap()
                    .contains("placement planner unreachable"));
            }
            other => panic!("expected startup error, got {other:?}"),
        }

        assert!(worker.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_failed_server_start_reports_error_over_fifo() {
        let dir = TempDir::new().unwrap();
        let fifo_path = dir.path().join("fifo");
        fifo::create(&fifo_path).unwrap();

        let worker_args = args(fifo_path.clone(), dir.path().join("state"));
        let worker = tokio::spawn(async move {
            run_consensus_process(
                worker_args,
                vec![Arc::new(GreeterServiceable)],
                Arc::new(FakeRuntime {
                    fail_server: true,
                    ..Default::default()
                }),
            )
            .await
        });

        match handshake::read_ports(&fifo_path).await {
            Err(ProtocolError::Startup(error)) => {
                assert!(error
                    .stack_trace
                    .as_deref()
                    .unwrap()
                    .contains("address already in use"));
            }
            other => panic!("expected startup error, got {other:?}"),
        }

        assert!(worker.await.unwrap().is_err());
    }
}
