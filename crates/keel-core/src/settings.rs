//! Load-bearing constants shared across the Keel components

/// Pod label marking a pod as hosting a consensus. Used to target pods for
/// proxy-filter distribution; the name and value must match what the filter
/// distribution machinery selects on.
pub const IS_CONSENSUS_LABEL_NAME: &str = "is-reboot-consensus";

/// Value of [`IS_CONSENSUS_LABEL_NAME`]
pub const IS_CONSENSUS_LABEL_VALUE: &str = "true";

/// Pod label carrying the specific consensus id, for narrower proxy-filter
/// targeting.
pub const CONSENSUS_ID_LABEL_NAME: &str = "reboot-consensus-id";

/// Storage class used for every consensus's persistent volume claim
pub const STORAGE_CLASS_NAME: &str = "keel-storage";

/// Storage request for every consensus's persistent volume claim
pub const STORAGE_REQUEST: &str = "10Gi";

/// Well-known gRPC port of a user container running on Kubernetes
pub const USER_CONTAINER_GRPC_PORT: u16 = 50051;

/// Well-known WebSocket port of a user container running on Kubernetes
pub const USER_CONTAINER_WEBSOCKET_PORT: u16 = 50052;

/// Name of the Service port carrying gRPC traffic. To let this port serve
/// gRPC when there's an intermediate proxy in gateway mode, this port MUST
/// be called "grpc".
pub const GRPC_PORT_NAME: &str = "grpc";

/// Name of the Service port carrying WebSocket traffic for browsers
pub const WEBSOCKET_PORT_NAME: &str = "websocket";

/// Cloud protocol version announced to launched containers
pub const CLOUD_PROTOCOL_VERSION: &str = "v1alpha1";

/// State directory mounted into a consensus container
pub const CONTAINER_STATE_DIRECTORY: &str = "/var/run/keel/state";

/// Environment variable: application id of the launched consensus
pub const ENVVAR_APPLICATION_ID: &str = "KEEL_APPLICATION_ID";

/// Environment variable: consensus id of the launched consensus
pub const ENVVAR_CONSENSUS_ID: &str = "KEEL_CONSENSUS_ID";

/// Environment variable: cloud protocol version
pub const ENVVAR_CLOUD_VERSION: &str = "KEEL_CLOUD_VERSION";

/// Environment variable: port the platform expects the container to serve on
pub const ENVVAR_PORT: &str = "PORT";

/// Environment variable: forces unbuffered output in the launched process,
/// so logs show up immediately for debugging.
pub const ENVVAR_UNBUFFERED: &str = "PYTHONUNBUFFERED";

/// Environment variable: state directory inside the container
pub const ENVVAR_STATE_DIRECTORY: &str = "KEEL_STATE_DIRECTORY";

/// Environment variable: default effect validation mode for local launches
pub const ENVVAR_EFFECT_VALIDATION: &str = "KEEL_EFFECT_VALIDATION";

/// Suffix of the per-consensus storage engine directory under the
/// application's state directory.
pub const SIDECAR_SUFFIX: &str = "-sidecar";

/// File name of the per-application metadata record
pub const METADATA_FILE_NAME: &str = "__metadata";

/// Bind address meaning "every local network interface"
pub const EVERY_LOCAL_NETWORK_ADDRESS: &str = "0.0.0.0";

/// Host name local consensuses are routed to. Even a same-host deployment
/// never assumes a shared port; each consensus keeps its own bound port
/// behind this host.
pub const LOCALHOST: &str = "localhost";

/// System services every local proxy routes in addition to the fronted
/// serviceables.
pub const SYSTEM_SERVICE_FULL_NAMES: &[&str] = &["keel.v1alpha1.Routing", "keel.v1alpha1.Inspect"];
