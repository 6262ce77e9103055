pub const PRODUCT_NAME: &str = "rill";
pub const IMAGE_NAME: &str = "rillio/rill";

// Coordinator defaults
pub const COORDINATOR_COMPONENT_NAME: &str = "coordinator";
pub const COORDINATOR_CONTAINER_NAME: &str = "rill-coordinator";
pub const COORDINATOR_RPC_PORT: u16 = 6123;
pub const COORDINATOR_START_SCRIPT: &str = "/opt/rill/bin/coordinator.sh";

// Worker defaults
pub const WORKER_COMPONENT_NAME: &str = "worker";
pub const WORKER_CONTAINER_NAME: &str = "rill-worker";
pub const WORKER_RPC_PORT: u16 = 6122;

// Coordinator side services
pub const ARTIFACT_SERVER_PORT: u16 = 6124;
pub const ADMIN_PORT: u16 = 8081;

// Container port names, referenced by the k8 services
pub const COORDINATOR_RPC_PORT_NAME: &str = "coordinator-rpc";
pub const WORKER_RPC_PORT_NAME: &str = "worker-rpc";
pub const ARTIFACT_SERVER_PORT_NAME: &str = "artifact-server";
pub const ADMIN_PORT_NAME: &str = "admin";

// Entrypoint identifiers, stamped into the working configuration so the
// container knows which coordinator flavor to boot
pub const SESSION_ENTRYPOINT: &str = "session-coordinator";
pub const APPLICATION_ENTRYPOINT: &str = "application-coordinator";
pub const SCRIPT_RUNNER_ENTRYPOINT: &str = "script-runner";

// Env
pub const RILL_HOST_IP: &str = "RILL_HOST_IP";
pub const RILL_POD_IP: &str = "RILL_POD_IP";
pub const RILL_CLUSTER_ID: &str = "RILL_CLUSTER_ID";

// K8 pod field paths resolved by the platform at pod start
pub const HOST_IP_FIELD_PATH: &str = "status.hostIP";
pub const POD_IP_FIELD_PATH: &str = "status.podIP";
pub const POD_API_VERSION: &str = "v1";

// DNS policies paired with the host-network flag
pub const DNS_POLICY_HOST_NETWORK: &str = "ClusterFirstWithHostNet";
pub const DNS_POLICY_DEFAULT: &str = "ClusterFirst";

// Restart policies
pub const RESTART_POLICY_ALWAYS: &str = "Always";
pub const RESTART_POLICY_NEVER: &str = "Never";

// K8 service name suffixes per cluster id
pub const ADMIN_SERVICE_SUFFIX: &str = "-admin";
pub const INTERNAL_SERVICE_SUFFIX: &str = "-internal";
