//! Local reconciliation backend
//!
//! Hosts consensuses on the local machine, either as servers running inside
//! this process or as supervised OS subprocesses, and keeps a local reverse
//! proxy's routing table in sync with the set of running consensuses.
//!
//! Unlike on Kubernetes the serviceables themselves live here: callers
//! register them (plus how they want them hosted) before the first
//! reconciliation, and the planned consensuses then refer to them by
//! service name.

mod launched;
mod subprocess;

pub use subprocess::FailFast;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use keel_core::traits::{
    ConsensusRuntime, LocalEnvoy, LocalEnvoyFactory, ProxyConfig, ServerConfig, Serviceable,
    TokenVerifier,
};
use keel_core::{settings, Consensus, ConsensusAddress, InputError, KeelError};
use keel_protocol::{
    fifo, handshake, ApplicationId, ConsensusId, EffectValidation, LaunchArgs, ServiceName,
    ENVVAR_LAUNCH_ARGS,
};

use crate::manager::{ConsensusBackend, ConsensusManager};
use launched::{LaunchedConsensus, LaunchedState};

/// Consensus manager hosting consensuses on the local machine
pub type LocalConsensusManager = ConsensusManager<LocalBackend>;

/// Command line of the worker binary that hosts a subprocess consensus.
///
/// The worker receives its launch arguments through the
/// [`ENVVAR_LAUNCH_ARGS`] environment variable, not through this command
/// line; the args here are fixed flags of the binary itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// Path of the worker binary
    pub program: PathBuf,
    /// Fixed arguments passed to the binary
    #[serde(default)]
    pub args: Vec<String>,
}

/// Options of a [`LocalBackend`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalManagerOptions {
    /// Directory holding per-application state across restarts. When absent
    /// a temporary directory is used and state lives only as long as the
    /// backend.
    pub state_directory: Option<PathBuf>,
    /// Effect validation mode used when no registration names one. When
    /// this is also unset the mode comes from the environment, defaulting
    /// to enabled.
    pub effect_validation: Option<EffectValidation>,
    /// Worker command for consensuses hosted out of process
    pub worker: Option<WorkerCommand>,
}

/// How a batch of serviceables should be hosted
#[derive(Clone, Default)]
pub struct ServiceableRegistration {
    /// Host inside this process instead of in a subprocess
    pub in_process: bool,
    /// Route these serviceables through the local reverse proxy
    pub local_envoy: bool,
    /// Port the proxy should listen on; every proxy-fronted registration
    /// must name the same port.
    pub local_envoy_port: u16,
    /// Token verifier for incoming requests; every serviceable of a
    /// consensus must share one verifier.
    pub token_verifier: Option<Arc<dyn TokenVerifier>>,
    /// Effect validation override; when no registration of a consensus sets
    /// one, the mode comes from the environment.
    pub effect_validation: Option<EffectValidation>,
}

#[derive(Clone)]
struct RegisteredServiceable {
    serviceable: Arc<dyn Serviceable>,
    in_process: bool,
    local_envoy: bool,
    local_envoy_port: u16,
    token_verifier: Option<Arc<dyn TokenVerifier>>,
    effect_validation: Option<EffectValidation>,
}

/// Per-application record persisted in the state directory. Guards against
/// a plan silently changing an application's partitioning, which would
/// orphan persisted shard state.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ApplicationMetadata {
    consensus_count: u32,
}

/// Reconciliation backend for the local machine
pub struct LocalBackend {
    options: LocalManagerOptions,
    runtime: Arc<dyn ConsensusRuntime>,
    envoy_factory: Arc<dyn LocalEnvoyFactory>,

    serviceables_by_service_name: HashMap<ServiceName, RegisteredServiceable>,
    launched_consensuses: HashMap<ConsensusId, LaunchedConsensus>,
    app_internal_api_key_secrets: HashMap<ApplicationId, String>,
    placement_planner_address: Option<String>,

    local_envoy: Option<Box<dyn LocalEnvoy>>,

    state_directory: PathBuf,
    // Keeps a default state directory alive for the backend's lifetime.
    _state_tempdir: Option<TempDir>,

    fail_fast: FailFast,
}

impl LocalBackend {
    /// Create a backend over the given runtime and proxy factory
    pub fn new(
        options: LocalManagerOptions,
        runtime: Arc<dyn ConsensusRuntime>,
        envoy_factory: Arc<dyn LocalEnvoyFactory>,
    ) -> Result<Self, KeelError> {
        let (state_directory, state_tempdir) = match &options.state_directory {
            Some(directory) => {
                if !directory.is_dir() {
                    return Err(InputError::new(format!(
                        "state directory '{}' does not exist",
                        directory.display()
                    ))
                    .into());
                }
                (directory.clone(), None)
            }
            None => {
                let tempdir = TempDir::new()?;
                (tempdir.path().to_path_buf(), Some(tempdir))
            }
        };

        Ok(Self {
            options,
            runtime,
            envoy_factory,
            serviceables_by_service_name: HashMap::new(),
            launched_consensuses: HashMap::new(),
            app_internal_api_key_secrets: HashMap::new(),
            placement_planner_address: None,
            local_envoy: None,
            state_directory,
            _state_tempdir: state_tempdir,
            fail_fast: FailFast::default(),
        })
    }

    /// Register serviceables a later plan may refer to by service name.
    ///
    /// Registering a service name again replaces the earlier registration.
    pub fn register_serviceables(
        &mut self,
        serviceables: &[Arc<dyn Serviceable>],
        registration: ServiceableRegistration,
    ) {
        for serviceable in serviceables {
            for service_name in serviceable.service_names() {
                self.serviceables_by_service_name.insert(
                    service_name,
                    RegisteredServiceable {
                        serviceable: Arc::clone(serviceable),
                        in_process: registration.in_process,
                        local_envoy: registration.local_envoy,
                        local_envoy_port: registration.local_envoy_port,
                        token_verifier: registration.token_verifier.clone(),
                        effect_validation: registration.effect_validation,
                    },
                );
            }
        }
    }

    /// Register the address of the placement planner that launched
    /// consensuses resolve against. Must happen before the first launch.
    pub fn register_placement_planner_address(&mut self, address: impl Into<String>) {
        self.placement_planner_address = Some(address.into());
    }

    /// Replace the action taken when a supervised subprocess exits without
    /// being asked to. The default terminates the current process.
    pub fn set_fail_fast(&mut self, fail_fast: FailFast) {
        self.fail_fast = fail_fast;
    }

    /// The secret consensuses of the given application authenticate to one
    /// another with, once at least one of them has been launched.
    pub fn app_internal_api_key_secret(&self, application_id: &ApplicationId) -> Option<&str> {
        self.app_internal_api_key_secrets
            .get(application_id)
            .map(String::as_str)
    }

    /// Stop one running consensus without forgetting it, so that a test can
    /// observe its application's behavior while a partition is unreachable.
    /// Returns the spec to later restart it from.
    pub async fn consensus_stop(
        &mut self,
        consensus_id: &ConsensusId,
    ) -> Result<Consensus, KeelError> {
        assert!(
            self.local_envoy.is_some(),
            "consensuses can only be stopped while a local proxy is running"
        );

        let Some(mut launched) = self.launched_consensuses.remove(consensus_id) else {
            let mut running: Vec<String> = self
                .launched_consensuses
                .keys()
                .map(ToString::to_string)
                .collect();
            running.sort();
            return Err(InputError::new(format!(
                "unknown consensus '{}'; launched consensuses: [{}]",
                consensus_id,
                running.join(", ")
            ))
            .into());
        };
        let spec = launched.consensus.clone();
        let stopped = launched.stop().await;
        // The entry survives as stopped so the consensus can be restarted.
        self.launched_consensuses
            .insert(consensus_id.clone(), launched);
        stopped?;

        // The proxy must learn that the consensus is now unreachable.
        self.configure_proxy().await?;
        Ok(spec)
    }

    /// Restart a consensus previously stopped with
    /// [`consensus_stop`](Self::consensus_stop). The consensus comes back
    /// on fresh OS-assigned ports.
    pub async fn consensus_start(&mut self, consensus: &Consensus) -> Result<(), KeelError> {
        match self.launched_consensuses.get(&consensus.id) {
            Some(launched) => assert!(
                launched.stopped(),
                "consensus '{}' is already running",
                consensus.id
            ),
            None => {
                return Err(InputError::new(format!(
                    "unknown consensus '{}'; only a stopped consensus can be started",
                    consensus.id
                ))
                .into())
            }
        }

        let launched = self.launch_consensus(consensus).await?;
        self.launched_consensuses
            .insert(consensus.id.clone(), launched);
        self.configure_proxy().await?;
        Ok(())
    }

    /// Stop every launched consensus and the proxy.
    ///
    /// Teardown is explicit: the state managers hold OS resources (and the
    /// subprocesses are real processes) that must not outlive the backend.
    pub async fn shutdown(&mut self) -> Result<(), KeelError> {
        for launched in self.launched_consensuses.values_mut() {
            launched.stop().await?;
        }
        self.launched_consensuses.clear();
        if let Some(mut envoy) = self.local_envoy.take() {
            envoy.stop().await?;
        }
        Ok(())
    }

    async fn validate_consensus_count(
        &self,
        application_id: &ApplicationId,
        count: u32,
    ) -> Result<(), KeelError> {
        let application_directory = self.state_directory.join(application_id.as_str());
        let metadata_path = application_directory.join(settings::METADATA_FILE_NAME);

        match tokio::fs::read(&metadata_path).await {
            Ok(bytes) => {
                let metadata: ApplicationMetadata =
                    bincode::deserialize(&bytes).map_err(keel_protocol::ProtocolError::from)?;
                if metadata.consensus_count != count {
                    return Err(InputError::new(format!(
                        "Cannot change the number of partitions for an application. \
                         There were {}, and now there are {}.",
                        metadata.consensus_count, count
                    ))
                    .into());
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&application_directory).await?;
                let bytes = bincode::serialize(&ApplicationMetadata {
                    consensus_count: count,
                })
                .map_err(keel_protocol::ProtocolError::from)?;
                tokio::fs::write(&metadata_path, bytes).await?;
            }
            Err(error) => return Err(error.into()),
        }
        Ok(())
    }

    async fn launch_consensus(
        &mut self,
        consensus: &Consensus,
    ) -> Result<LaunchedConsensus, KeelError> {
        let placement_planner_address = self
            .placement_planner_address
            .clone()
            .expect("the placement planner address must be registered before a launch");

        let mut serviceables: Vec<Arc<dyn Serviceable>> = Vec::new();
        let mut token_verifier: Option<Arc<dyn TokenVerifier>> = None;
        let mut effect_validation: Option<EffectValidation> = None;
        let mut any_in_process = false;
        let mut any_subprocess = false;

        for service_name in &consensus.service_names {
            let registered = self
                .serviceables_by_service_name
                .get(service_name)
                .ok_or_else(|| {
                    InputError::new(format!(
                        "service '{service_name}' has not been registered with the \
                         local consensus manager"
                    ))
                })?;

            if registered.in_process {
                any_in_process = true;
            } else {
                any_subprocess = true;
            }

            if !serviceables
                .iter()
                .any(|known| Arc::ptr_eq(known, &registered.serviceable))
            {
                serviceables.push(Arc::clone(&registered.serviceable));
            }

            match (&token_verifier, &registered.token_verifier) {
                (None, Some(registered)) => token_verifier = Some(Arc::clone(registered)),
                (Some(known), Some(registered)) => assert!(
                    Arc::ptr_eq(known, registered),
                    "every serviceable of consensus '{}' must share one token verifier",
                    consensus.id
                ),
                _ => {}
            }

            match (effect_validation, registered.effect_validation) {
                (None, Some(registered)) => effect_validation = Some(registered),
                (Some(known), Some(registered)) => assert_eq!(
                    known, registered,
                    "every serviceable of consensus '{}' must agree on effect validation",
                    consensus.id
                ),
                _ => {}
            }
        }

        assert!(
            !(any_in_process && any_subprocess),
            "consensus '{}' mixes in-process and subprocess serviceables",
            consensus.id
        );

        let effect_validation = effect_validation
            .or(self.options.effect_validation)
            .unwrap_or_else(default_effect_validation);

        let app_internal_api_key_secret = self
            .app_internal_api_key_secrets
            .entry(consensus.application_id.clone())
            .or_insert_with(generate_secret)
            .clone();

        let directory = self
            .state_directory
            .join(consensus.application_id.as_str())
            .join(format!("{}{}", consensus.id, settings::SIDECAR_SUFFIX));
        tokio::fs::create_dir_all(&directory).await?;

        if any_subprocess {
            self.launch_subprocess(
                consensus,
                directory,
                effect_validation,
                app_internal_api_key_secret,
                placement_planner_address,
            )
            .await
        } else {
            self.launch_in_process(
                consensus,
                directory,
                serviceables,
                token_verifier,
                effect_validation,
                app_internal_api_key_secret,
                placement_planner_address,
            )
            .await
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn launch_in_process(
        &self,
        consensus: &Consensus,
        directory: PathBuf,
        serviceables: Vec<Arc<dyn Serviceable>>,
        token_verifier: Option<Arc<dyn TokenVerifier>>,
        effect_validation: EffectValidation,
        app_internal_api_key_secret: String,
        placement_planner_address: String,
    ) -> Result<LaunchedConsensus, KeelError> {
        let resolver = self
            .runtime
            .start_resolver(&placement_planner_address)
            .await?;
        let state_manager = self
            .runtime
            .open_state_manager(&directory, &consensus.shards, &serviceables)
            .await?;
        let server = self
            .runtime
            .start_server(ServerConfig {
                application_id: consensus.application_id.clone(),
                consensus_id: consensus.id.clone(),
                serviceables,
                listen_address: format!("{}:0", settings::EVERY_LOCAL_NETWORK_ADDRESS),
                token_verifier,
                resolver: Arc::clone(&resolver),
                state_manager: Arc::clone(&state_manager),
                file_descriptor_set: consensus.file_descriptor_set.clone(),
                effect_validation,
                app_internal_api_key_secret,
            })
            .await?;

        let address = ConsensusAddress::new(
            settings::LOCALHOST,
            server.grpc_port(),
            server.websocket_port(),
        );
        tracing::info!("consensus '{}' serving on {}", consensus.id, address);

        Ok(LaunchedConsensus::new(
            consensus.clone(),
            address,
            LaunchedState::InProcess {
                server,
                resolver,
                state_manager,
            },
        ))
    }

    async fn launch_subprocess(
        &self,
        consensus: &Consensus,
        directory: PathBuf,
        effect_validation: EffectValidation,
        app_internal_api_key_secret: String,
        placement_planner_address: String,
    ) -> Result<LaunchedConsensus, KeelError> {
        let worker = self.options.worker.clone().ok_or_else(|| {
            InputError::new(format!(
                "no worker command configured to host consensus '{}' out of process",
                consensus.id
            ))
        })?;

        // One fresh FIFO in a private directory per launch; the directory
        // is removed once the handshake is done.
        let fifo_directory = TempDir::new()?;
        let fifo_path = fifo_directory.path().join("fifo");
        fifo::create(&fifo_path)?;

        let args = LaunchArgs {
            application_id: consensus.application_id.clone(),
            consensus_id: consensus.id.clone(),
            shards: consensus.shards.clone(),
            directory,
            address: format!("{}:0", settings::EVERY_LOCAL_NETWORK_ADDRESS),
            placement_planner_address,
            fifo: fifo_path.clone(),
            file_descriptor_set: consensus.file_descriptor_set.clone(),
            effect_validation,
            app_internal_api_key_secret,
        };

        let mut child = std::process::Command::new(&worker.program)
            .args(&worker.args)
            .env(ENVVAR_LAUNCH_ARGS, args.encode()?)
            .env(settings::ENVVAR_UNBUFFERED, "1")
            .spawn()?;
        tracing::debug!(
            "spawned worker (pid {}) for consensus '{}'",
            child.id(),
            consensus.id
        );

        let (grpc_port, websocket_port) = match handshake::read_ports(&fifo_path).await {
            Ok(ports) => ports,
            Err(error) => {
                // The child reported a startup failure (or broke the pipe)
                // and is exiting on its own; reap it before re-raising.
                let _ = child.kill();
                let _ = child.wait();
                return Err(error.into());
            }
        };

        let handle = subprocess::SubprocessHandle::supervise(
            child,
            consensus.id.clone(),
            self.fail_fast.clone(),
        )?;

        let address = ConsensusAddress::new(settings::LOCALHOST, grpc_port, websocket_port);
        tracing::info!(
            "consensus '{}' serving on {} (pid {})",
            consensus.id,
            address,
            handle.pid()
        );

        Ok(LaunchedConsensus::new(
            consensus.clone(),
            address,
            LaunchedState::Subprocess(handle),
        ))
    }

    /// Tear the proxy down and bring a fresh one up for the current set of
    /// launched consensuses. The proxy is always reconfigured from scratch;
    /// there is no incremental update.
    async fn configure_proxy(&mut self) -> Result<(), KeelError> {
        if let Some(mut envoy) = self.local_envoy.take() {
            envoy.stop().await?;
        }

        let mut routables: Vec<ServiceName> = Vec::new();
        let mut listener_port = 0u16;
        for (service_name, registered) in &self.serviceables_by_service_name {
            if !registered.local_envoy {
                continue;
            }
            routables.push(service_name.clone());
            if listener_port == 0 {
                listener_port = registered.local_envoy_port;
            } else {
                assert_eq!(
                    listener_port, registered.local_envoy_port,
                    "every proxy-fronted serviceable must name the same proxy port"
                );
            }
        }
        if routables.is_empty() {
            return Ok(());
        }
        routables.sort();

        let mut application_id: Option<ApplicationId> = None;
        let mut address_by_consensus: HashMap<ConsensusId, ConsensusAddress> = HashMap::new();
        let mut stopped_consensuses: HashSet<ConsensusId> = HashSet::new();
        for launched in self.launched_consensuses.values() {
            match &application_id {
                None => application_id = Some(launched.consensus.application_id.clone()),
                Some(known) => assert_eq!(
                    *known, launched.consensus.application_id,
                    "a local deployment hosts exactly one application"
                ),
            }
            if launched.stopped() {
                stopped_consensuses.insert(launched.consensus.id.clone());
            }
            address_by_consensus.insert(
                launched.consensus.id.clone(),
                ConsensusAddress::new(
                    settings::LOCALHOST,
                    launched.address.grpc_port,
                    launched.address.websocket_port,
                ),
            );
        }
        let Some(application_id) = application_id else {
            // Nothing launched yet; the proxy comes up with the first
            // consensus.
            return Ok(());
        };

        routables.extend(
            settings::SYSTEM_SERVICE_FULL_NAMES
                .iter()
                .map(|name| ServiceName::new(*name)),
        );

        let mut envoy = self.envoy_factory.create(ProxyConfig {
            listener_port,
            application_id,
            routables,
            stopped_consensuses,
        })?;
        envoy.start().await?;
        envoy.set_consensuses(&address_by_consensus).await?;
        self.local_envoy = Some(envoy);
        Ok(())
    }
}

#[async_trait]
impl ConsensusBackend for LocalBackend {
    /// Reject plans that change an application's partition count relative
    /// to the persisted state directory.
    async fn prepare(&mut self, planned: &[Consensus]) -> Result<(), KeelError> {
        let mut counts: HashMap<ApplicationId, u32> = HashMap::new();
        for consensus in planned {
            *counts.entry(consensus.application_id.clone()).or_insert(0) += 1;
        }
        for (application_id, count) in counts {
            self.validate_consensus_count(&application_id, count).await?;
        }
        Ok(())
    }

    async fn set_consensus(
        &mut self,
        consensus: &Consensus,
    ) -> Result<ConsensusAddress, KeelError> {
        if let Some(launched) = self.launched_consensuses.get(&consensus.id) {
            assert_eq!(
                launched.consensus, *consensus,
                "the spec of consensus '{}' changed; in-place updates are not supported",
                consensus.id
            );
            return Ok(launched.address.clone());
        }

        let launched = self.launch_consensus(consensus).await?;
        let address = launched.address.clone();
        self.launched_consensuses
            .insert(consensus.id.clone(), launched);
        Ok(address)
    }

    async fn delete_consensus(&mut self, consensus: &Consensus) -> Result<(), KeelError> {
        if let Some(mut launched) = self.launched_consensuses.remove(&consensus.id) {
            launched.stop().await?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), KeelError> {
        self.configure_proxy().await
    }
}

impl ConsensusManager<LocalBackend> {
    /// See [`LocalBackend::register_serviceables`]
    pub fn register_serviceables(
        &mut self,
        serviceables: &[Arc<dyn Serviceable>],
        registration: ServiceableRegistration,
    ) {
        self.backend_mut()
            .register_serviceables(serviceables, registration);
    }

    /// See [`LocalBackend::register_placement_planner_address`]
    pub fn register_placement_planner_address(&mut self, address: impl Into<String>) {
        self.backend_mut().register_placement_planner_address(address);
    }

    /// See [`LocalBackend::consensus_stop`]
    pub async fn consensus_stop(
        &mut self,
        consensus_id: &ConsensusId,
    ) -> Result<Consensus, KeelError> {
        self.backend_mut().consensus_stop(consensus_id).await
    }

    /// See [`LocalBackend::consensus_start`]
    pub async fn consensus_start(&mut self, consensus: &Consensus) -> Result<(), KeelError> {
        self.backend_mut().consensus_start(consensus).await
    }

    /// See [`LocalBackend::app_internal_api_key_secret`]
    pub fn app_internal_api_key_secret(&self, application_id: &ApplicationId) -> Option<&str> {
        self.backend().app_internal_api_key_secret(application_id)
    }

    /// See [`LocalBackend::shutdown`]
    pub async fn shutdown(&mut self) -> Result<(), KeelError> {
        self.backend_mut().shutdown().await
    }
}

/// Effect validation mode used when no registration names one
fn default_effect_validation() -> EffectValidation {
    std::env::var(settings::ENVVAR_EFFECT_VALIDATION)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(43)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::Result;
    use bytes::Bytes;
    use keel_core::traits::{ConsensusServer, Resolver, StateManager};
    use keel_protocol::ShardInfo;

    struct FakeServiceable {
        names: Vec<ServiceName>,
    }

    impl FakeServiceable {
        fn arc(names: &[&str]) -> Arc<dyn Serviceable> {
            Arc::new(Self {
                names: names.iter().map(|name| ServiceName::new(*name)).collect(),
            })
        }
    }

    impl Serviceable for FakeServiceable {
        fn service_names(&self) -> Vec<ServiceName> {
            self.names.clone()
        }
    }

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

    struct FakeServer {
        grpc_port: u16,
        websocket_port: u16,
    }

    #[async_trait]
    impl ConsensusServer for FakeServer {
        fn grpc_port(&self) -> u16 {
            self.grpc_port
        }

        fn websocket_port(&self) -> u16 {
            self.websocket_port
        }

        async fn wait(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Hands out incrementing port pairs, so a restarted consensus visibly
    /// lands on new ports.
    #[derive(Default)]
    struct FakeRuntime {
        next_port: AtomicU16,
        servers_started: AtomicUsize,
    }

    #[async_trait]
    impl ConsensusRuntime for FakeRuntime {
        async fn start_resolver(
            &self,
            _placement_planner_address: &str,
        ) -> Result<Arc<dyn Resolver>> {
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
            self.servers_started.fetch_add(1, Ordering::SeqCst);
            let port = 40000 + self.next_port.fetch_add(2, Ordering::SeqCst);
            Ok(Arc::new(FakeServer {
                grpc_port: port,
                websocket_port: port + 1,
            }))
        }
    }

    #[derive(Clone, Default)]
    struct EnvoyLog {
        events: Arc<Mutex<Vec<String>>>,
        configs: Arc<Mutex<Vec<ProxyConfig>>>,
        tables: Arc<Mutex<Vec<HashMap<ConsensusId, ConsensusAddress>>>>,
    }

    impl EnvoyLog {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn last_config(&self) -> ProxyConfig {
            self.configs.lock().unwrap().last().unwrap().clone()
        }

        fn last_table(&self) -> HashMap<ConsensusId, ConsensusAddress> {
            self.tables.lock().unwrap().last().unwrap().clone()
        }
    }

    struct RecordingEnvoy {
        log: EnvoyLog,
    }

    #[async_trait]
    impl LocalEnvoy for RecordingEnvoy {
        async fn start(&mut self) -> Result<()> {
            self.log.events.lock().unwrap().push("start".to_string());
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.log.events.lock().unwrap().push("stop".to_string());
            Ok(())
        }

        async fn set_consensuses(
            &mut self,
            address_by_consensus: &HashMap<ConsensusId, ConsensusAddress>,
        ) -> Result<()> {
            self.log
                .events
                .lock()
                .unwrap()
                .push(format!("set({})", address_by_consensus.len()));
            self.log
                .tables
                .lock()
                .unwrap()
                .push(address_by_consensus.clone());
            Ok(())
        }
    }

    struct RecordingEnvoyFactory {
        log: EnvoyLog,
    }

    impl LocalEnvoyFactory for RecordingEnvoyFactory {
        fn create(&self, config: ProxyConfig) -> Result<Box<dyn LocalEnvoy>> {
            self.log.configs.lock().unwrap().push(config);
            Ok(Box::new(RecordingEnvoy {
                log: self.log.clone(),
            }))
        }
    }

    fn consensus(id: &str, services: &[&str]) -> Consensus {
        Consensus {
            id: ConsensusId::new(id),
            application_id: ApplicationId::new("app"),
            namespace: None,
            container_image_name: None,
            shards: vec![ShardInfo::new("shard-0", Bytes::new())],
            service_names: services.iter().map(|name| ServiceName::new(*name)).collect(),
            file_descriptor_set: Bytes::new(),
        }
    }

    struct Fixture {
        manager: LocalConsensusManager,
        log: EnvoyLog,
        runtime: Arc<FakeRuntime>,
    }

    fn fixture(options: LocalManagerOptions) -> Fixture {
        let log = EnvoyLog::default();
        let runtime = Arc::new(FakeRuntime::default());
        let backend = LocalBackend::new(
            options,
            Arc::clone(&runtime) as Arc<dyn ConsensusRuntime>,
            Arc::new(RecordingEnvoyFactory { log: log.clone() }),
        )
        .unwrap();
        let mut manager = LocalConsensusManager::new(backend);
        manager.register_serviceables(
            &[FakeServiceable::arc(&["demo.v1.Greeter"])],
            ServiceableRegistration {
                in_process: true,
                local_envoy: true,
                local_envoy_port: 9991,
                ..Default::default()
            },
        );
        manager.register_placement_planner_address("127.0.0.1:13131");
        Fixture {
            manager,
            log,
            runtime,
        }
    }

    #[tokio::test]
    async fn test_in_process_launch_and_idempotence() {
        let mut fixture = fixture(LocalManagerOptions::default());
        let plan = [consensus("c0", &["demo.v1.Greeter"])];

        let descriptors = fixture.manager.set_consensuses(&plan).await.unwrap();
        assert_eq!(descriptors[0].address.host, "localhost");
        let first_address = descriptors[0].address.clone();

        // Applying the unchanged plan must not start anything new.
        let descriptors = fixture.manager.set_consensuses(&plan).await.unwrap();
        assert_eq!(descriptors[0].address, first_address);
        assert_eq!(fixture.runtime.servers_started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_service_is_input_error() {
        let mut fixture = fixture(LocalManagerOptions::default());
        let plan = [consensus("c0", &["unknown.v1.Service"])];

        match fixture.manager.set_consensuses(&plan).await {
            Err(KeelError::Input(error)) => {
                assert!(error.reason.contains("unknown.v1.Service"));
            }
            other => panic!("expected input error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partition_count_change_rejected() {
        let state = TempDir::new().unwrap();
        let options = LocalManagerOptions {
            state_directory: Some(state.path().to_path_buf()),
            ..Default::default()
        };

        let mut first = fixture(options.clone());
        let three: Vec<Consensus> = (0..3)
            .map(|i| consensus(&format!("c{i}"), &["demo.v1.Greeter"]))
            .collect();
        first.manager.set_consensuses(&three).await.unwrap();

        let four: Vec<Consensus> = (0..4)
            .map(|i| consensus(&format!("c{i}"), &["demo.v1.Greeter"]))
            .collect();
        match first.manager.set_consensuses(&four).await {
            Err(KeelError::Input(error)) => {
                assert!(error.reason.contains("There were 3, and now there are 4."));
            }
            other => panic!("expected input error, got {other:?}"),
        }

        // The record survives a whole new manager over the same directory.
        let mut fresh = fixture(options);
        match fresh.manager.set_consensuses(&four).await {
            Err(KeelError::Input(error)) => {
                assert!(error.reason.contains("There were 3, and now there are 4."));
            }
            other => panic!("expected input error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_proxy_follows_topology_changes() {
        let mut fixture = fixture(LocalManagerOptions::default());
        let a = consensus("a", &["demo.v1.Greeter"]);
        let b = consensus("b", &["demo.v1.Greeter"]);

        fixture.manager.set_consensuses(&[a.clone()]).await.unwrap();
        fixture
            .manager
            .set_consensuses(&[a.clone(), b.clone()])
            .await
            .unwrap();
        fixture.manager.set_consensuses(&[a.clone()]).await.unwrap();

        // Each reconciliation stops the previous proxy and starts a fresh
        // one with the full table.
        assert_eq!(
            fixture.log.events(),
            [
                "start", "set(1)", // plan [a]
                "stop", "start", "set(2)", // plan [a, b]
                "stop", "start", "set(1)", // plan [a]
            ]
        );

        let config = fixture.log.last_config();
        assert_eq!(config.listener_port, 9991);
        assert_eq!(config.application_id, ApplicationId::new("app"));
        assert!(config.routables.contains(&ServiceName::new("demo.v1.Greeter")));
        // The built-in system services are always routed too.
        for name in settings::SYSTEM_SERVICE_FULL_NAMES {
            assert!(config.routables.contains(&ServiceName::new(*name)));
        }

        let table = fixture.log.last_table();
        assert!(table.contains_key(&ConsensusId::new("a")));
        assert!(!table.contains_key(&ConsensusId::new("b")));
    }

    #[tokio::test]
    async fn test_stop_and_restart_roundtrip() {
        let mut fixture = fixture(LocalManagerOptions::default());
        let a = consensus("a", &["demo.v1.Greeter"]);
        let b = consensus("b", &["demo.v1.Greeter"]);
        let descriptors = fixture
            .manager
            .set_consensuses(&[a.clone(), b.clone()])
            .await
            .unwrap();
        let address_a = descriptors[0].address.clone();
        let address_b = descriptors[1].address.clone();

        let spec = fixture
            .manager
            .consensus_stop(&ConsensusId::new("a"))
            .await
            .unwrap();
        assert_eq!(spec, a);
        let config = fixture.log.last_config();
        assert!(config.stopped_consensuses.contains(&ConsensusId::new("a")));
        // The stopped consensus stays in the table with its last address.
        assert_eq!(fixture.log.last_table().len(), 2);

        fixture.manager.consensus_start(&spec).await.unwrap();
        let config = fixture.log.last_config();
        assert!(config.stopped_consensuses.is_empty());

        let table = fixture.log.last_table();
        // Fresh ports for the restarted consensus; its sibling is untouched.
        assert_ne!(table[&ConsensusId::new("a")], address_a);
        assert_eq!(table[&ConsensusId::new("b")], address_b);
    }

    #[tokio::test]
    async fn test_stopping_unknown_consensus_is_input_error() {
        let mut fixture = fixture(LocalManagerOptions::default());
        fixture
            .manager
            .set_consensuses(&[consensus("a", &["demo.v1.Greeter"])])
            .await
            .unwrap();

        match fixture
            .manager
            .consensus_stop(&ConsensusId::new("nope"))
            .await
        {
            Err(KeelError::Input(error)) => {
                assert!(error.reason.contains("nope"));
                assert!(error.reason.contains('a'));
            }
            other => panic!("expected input error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_app_secret_is_stable_per_application() {
        let mut fixture = fixture(LocalManagerOptions::default());
        fixture
            .manager
            .set_consensuses(&[
                consensus("a", &["demo.v1.Greeter"]),
                consensus("b", &["demo.v1.Greeter"]),
            ])
            .await
            .unwrap();

        let secret = fixture
            .manager
            .app_internal_api_key_secret(&ApplicationId::new("app"))
            .unwrap()
            .to_string();
        assert_eq!(secret.len(), 43);

        // A later launch of the same application reuses the secret.
        fixture
            .manager
            .set_consensuses(&[
                consensus("a", &["demo.v1.Greeter"]),
                consensus("b", &["demo.v1.Greeter"]),
                consensus("c", &["demo.v1.Greeter"]),
            ])
            .await
            .unwrap_err(); // partition count change
        assert_eq!(
            fixture
                .manager
                .app_internal_api_key_secret(&ApplicationId::new("app"))
                .unwrap(),
            secret
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let mut fixture = fixture(LocalManagerOptions::default());
        fixture
            .manager
            .set_consensuses(&[consensus("a", &["demo.v1.Greeter"])])
            .await
            .unwrap();

        fixture.manager.shutdown().await.unwrap();
        assert_eq!(fixture.log.events().last().map(String::as_str), Some("stop"));
    }

    #[test]
    fn test_options_roundtrip_through_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local.toml");
        let options = LocalManagerOptions {
            state_directory: Some(PathBuf::from("/var/lib/keel")),
            worker: Some(WorkerCommand {
                program: PathBuf::from("/usr/bin/app-worker"),
                args: vec!["--quiet".to_string()],
            }),
            effect_validation: Some(EffectValidation::Quiet),
        };

        keel_core::config::save_config(&path, &options).unwrap();
        let loaded: LocalManagerOptions = keel_core::config::load_config(&path).unwrap();
        assert_eq!(loaded, options);
    }

    #[tokio::test]
    async fn test_missing_state_directory_is_input_error() {
        let options = LocalManagerOptions {
            state_directory: Some(PathBuf::from("/definitely/not/a/directory")),
            ..Default::default()
        };
        let result = LocalBackend::new(
            options,
            Arc::new(FakeRuntime::default()),
            Arc::new(RecordingEnvoyFactory {
                log: EnvoyLog::default(),
            }),
        );
        assert!(matches!(result, Err(KeelError::Input(_))));
    }
}
