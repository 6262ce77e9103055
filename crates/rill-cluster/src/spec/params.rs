//! Read-only parameter views consumed by the pipeline steps.
//!
//! Parameters are derived once per deployment or retrieval from the working
//! configuration (plus the caller's [`ClusterSpecification`] for the
//! coordinator) and never mutated afterwards. All option parsing and
//! validation happens here, so the steps themselves stay infallible reads.

use std::collections::BTreeMap;
use std::path::PathBuf;

use derive_builder::Builder;
use k8s_openapi::api::core::v1::Toleration;

use rill_types::defaults;
use rill_types::{ClusterId, CpuCores, MemoryMb, WorkerCount};

use crate::config::{keys, Configuration, ServiceExposedType};
use super::SpecError;

/// Requested sizing of the coordinator, supplied by the caller per
/// deployment and not persisted by this layer.
#[derive(Builder, Debug, Clone, PartialEq)]
pub struct ClusterSpecification {
    /// Memory ceiling of the coordinator container, in MiB.
    #[builder(default = "1024")]
    coordinator_memory_mb: MemoryMb,
    /// CPU core ceiling of the coordinator container.
    #[builder(default = "1.0")]
    coordinator_cpu: CpuCores,
    /// Worker containers the coordinator provisions once it is running.
    #[builder(default = "1")]
    worker_count: WorkerCount,
}

impl ClusterSpecification {
    pub fn builder() -> ClusterSpecificationBuilder {
        ClusterSpecificationBuilder::default()
    }

    pub fn coordinator_memory_mb(&self) -> MemoryMb {
        self.coordinator_memory_mb
    }

    pub fn coordinator_cpu(&self) -> CpuCores {
        self.coordinator_cpu
    }

    pub fn worker_count(&self) -> WorkerCount {
        self.worker_count
    }
}

fn request_factor(config: &Configuration, key: &'static str) -> Result<f64, SpecError> {
    let factor = config.parsed_or(key, 1.0)?;
    if factor <= 0.0 || factor > 1.0 {
        return Err(SpecError::InvalidRequestFactor { key, value: factor });
    }
    Ok(factor)
}

/// Parses toleration entries of the form `key[=value][:effect]`.
///
/// A bare key tolerates any value (`Exists`); `key=value` tolerates that
/// exact value (`Equal`).
fn parse_tolerations(entries: &[String]) -> Result<Vec<Toleration>, SpecError> {
    entries
        .iter()
        .map(|entry| {
            let (matcher, effect) = match entry.rsplit_once(':') {
                Some((matcher, effect)) => (matcher, Some(effect.to_owned())),
                None => (entry.as_str(), None),
            };
            if matcher.is_empty() {
                return Err(SpecError::InvalidToleration(entry.clone()));
            }
            let toleration = match matcher.split_once('=') {
                Some((key, value)) if !key.is_empty() => Toleration {
                    key: Some(key.to_owned()),
                    operator: Some("Equal".to_owned()),
                    value: Some(value.to_owned()),
                    effect,
                    ..Default::default()
                },
                Some(_) => return Err(SpecError::InvalidToleration(entry.clone())),
                None => Toleration {
                    key: Some(matcher.to_owned()),
                    operator: Some("Exists".to_owned()),
                    effect,
                    ..Default::default()
                },
            };
            Ok(toleration)
        })
        .collect()
}

fn default_image() -> String {
    format!("{}:{}", defaults::IMAGE_NAME, env!("CARGO_PKG_VERSION"))
}

fn baseline_labels(cluster_id: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_owned(), defaults::PRODUCT_NAME.to_owned()),
        ("component".to_owned(), component.to_owned()),
        ("cluster".to_owned(), cluster_id.to_owned()),
    ])
}

/// Derived view over the coordinator's deployment configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorParameters {
    cluster_id: ClusterId,
    namespace: String,
    image: String,
    image_pull_policy: String,
    image_pull_secrets: Vec<String>,
    service_account: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    node_selector: BTreeMap<String, String>,
    tolerations: Vec<Toleration>,
    environment: BTreeMap<String, String>,
    memory_mb: MemoryMb,
    cpu: CpuCores,
    memory_request_factor: f64,
    cpu_request_factor: f64,
    worker_count: WorkerCount,
    rpc_port: u16,
    artifact_port: u16,
    admin_port: u16,
    host_network_enabled: bool,
    entrypoint: String,
    admin_service_exposed_type: ServiceExposedType,
    pod_template_file: Option<PathBuf>,
}

impl CoordinatorParameters {
    pub fn from_configuration(
        config: &Configuration,
        cluster_spec: &ClusterSpecification,
    ) -> Result<Self, SpecError> {
        let cluster_id = config
            .get(keys::CLUSTER_ID)
            .ok_or(SpecError::MissingOption(keys::CLUSTER_ID))?
            .to_owned();

        let mut labels = baseline_labels(&cluster_id, defaults::COORDINATOR_COMPONENT_NAME);
        labels.extend(config.get_map(keys::COORDINATOR_LABELS)?);

        Ok(Self {
            namespace: config
                .get(keys::NAMESPACE)
                .unwrap_or(crate::DEFAULT_NAMESPACE)
                .to_owned(),
            image: config
                .get(keys::CONTAINER_IMAGE)
                .map(str::to_owned)
                .unwrap_or_else(default_image),
            image_pull_policy: config
                .get(keys::CONTAINER_IMAGE_PULL_POLICY)
                .unwrap_or("IfNotPresent")
                .to_owned(),
            image_pull_secrets: config.get_list(keys::CONTAINER_IMAGE_PULL_SECRETS),
            service_account: config
                .get(keys::SERVICE_ACCOUNT)
                .unwrap_or("default")
                .to_owned(),
            labels,
            annotations: config.get_map(keys::COORDINATOR_ANNOTATIONS)?,
            node_selector: config.get_map(keys::COORDINATOR_NODE_SELECTOR)?,
            tolerations: parse_tolerations(&config.get_list(keys::COORDINATOR_TOLERATIONS))?,
            environment: config.prefixed(keys::COORDINATOR_ENV_PREFIX),
            memory_mb: cluster_spec.coordinator_memory_mb(),
            cpu: cluster_spec.coordinator_cpu(),
            memory_request_factor: request_factor(config, keys::COORDINATOR_MEMORY_REQUEST_FACTOR)?,
            cpu_request_factor: request_factor(config, keys::COORDINATOR_CPU_REQUEST_FACTOR)?,
            worker_count: cluster_spec.worker_count(),
            rpc_port: config.parsed_or(keys::COORDINATOR_RPC_PORT, defaults::COORDINATOR_RPC_PORT)?,
            artifact_port: config
                .parsed_or(keys::ARTIFACT_SERVER_PORT, defaults::ARTIFACT_SERVER_PORT)?,
            admin_port: config.parsed_or(keys::ADMIN_BIND_PORT, defaults::ADMIN_PORT)?,
            host_network_enabled: config.get_bool(keys::HOST_NETWORK_ENABLED, false)?,
            entrypoint: config
                .get(keys::ENTRYPOINT)
                .unwrap_or(defaults::SESSION_ENTRYPOINT)
                .to_owned(),
            admin_service_exposed_type: ServiceExposedType::from_config(config)?,
            pod_template_file: config.get(keys::POD_TEMPLATE_FILE).map(PathBuf::from),
            cluster_id,
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pod_name(&self) -> String {
        format!("{}-{}", self.cluster_id, defaults::COORDINATOR_COMPONENT_NAME)
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn image_pull_policy(&self) -> &str {
        &self.image_pull_policy
    }

    pub fn image_pull_secrets(&self) -> &[String] {
        &self.image_pull_secrets
    }

    pub fn service_account(&self) -> &str {
        &self.service_account
    }

    /// Pod labels: the selector labels plus any user-supplied ones.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// The stable subset of labels that deployment and services select on.
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        baseline_labels(&self.cluster_id, defaults::COORDINATOR_COMPONENT_NAME)
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn node_selector(&self) -> &BTreeMap<String, String> {
        &self.node_selector
    }

    pub fn tolerations(&self) -> &[Toleration] {
        &self.tolerations
    }

    /// User-supplied environment entries in mapping-iteration order.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn memory_mb(&self) -> MemoryMb {
        self.memory_mb
    }

    pub fn cpu(&self) -> CpuCores {
        self.cpu
    }

    pub fn memory_request_factor(&self) -> f64 {
        self.memory_request_factor
    }

    pub fn cpu_request_factor(&self) -> f64 {
        self.cpu_request_factor
    }

    pub fn worker_count(&self) -> WorkerCount {
        self.worker_count
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port
    }

    pub fn artifact_port(&self) -> u16 {
        self.artifact_port
    }

    pub fn admin_port(&self) -> u16 {
        self.admin_port
    }

    pub fn host_network_enabled(&self) -> bool {
        self.host_network_enabled
    }

    pub fn entrypoint(&self) -> &str {
        &self.entrypoint
    }

    pub fn admin_service_exposed_type(&self) -> ServiceExposedType {
        self.admin_service_exposed_type
    }

    pub fn pod_template_file(&self) -> Option<&PathBuf> {
        self.pod_template_file.as_ref()
    }
}

/// Derived view over one worker pod's configuration.
///
/// Workers are sized from configuration rather than from the caller's
/// [`ClusterSpecification`]; the running coordinator derives one of these per
/// pod it provisions.
#[derive(Debug, Clone)]
pub struct WorkerParameters {
    cluster_id: ClusterId,
    pod_name: String,
    image: String,
    image_pull_policy: String,
    image_pull_secrets: Vec<String>,
    service_account: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    node_selector: BTreeMap<String, String>,
    tolerations: Vec<Toleration>,
    environment: BTreeMap<String, String>,
    external_resources: BTreeMap<String, String>,
    memory_mb: MemoryMb,
    cpu: CpuCores,
    memory_request_factor: f64,
    cpu_request_factor: f64,
    rpc_port: u16,
    host_network_enabled: bool,
}

impl WorkerParameters {
    pub fn from_configuration(
        config: &Configuration,
        pod_name: impl Into<String>,
    ) -> Result<Self, SpecError> {
        let cluster_id = config
            .get(keys::CLUSTER_ID)
            .ok_or(SpecError::MissingOption(keys::CLUSTER_ID))?
            .to_owned();

        let mut labels = baseline_labels(&cluster_id, defaults::WORKER_COMPONENT_NAME);
        labels.extend(config.get_map(keys::WORKER_LABELS)?);

        Ok(Self {
            pod_name: pod_name.into(),
            image: config
                .get(keys::CONTAINER_IMAGE)
                .map(str::to_owned)
                .unwrap_or_else(default_image),
            image_pull_policy: config
                .get(keys::CONTAINER_IMAGE_PULL_POLICY)
                .unwrap_or("IfNotPresent")
                .to_owned(),
            image_pull_secrets: config.get_list(keys::CONTAINER_IMAGE_PULL_SECRETS),
            service_account: config
                .get(keys::SERVICE_ACCOUNT)
                .unwrap_or("default")
                .to_owned(),
            labels,
            annotations: config.get_map(keys::WORKER_ANNOTATIONS)?,
            node_selector: config.get_map(keys::WORKER_NODE_SELECTOR)?,
            tolerations: parse_tolerations(&config.get_list(keys::WORKER_TOLERATIONS))?,
            environment: config.prefixed(keys::WORKER_ENV_PREFIX),
            external_resources: config.prefixed(keys::WORKER_EXTERNAL_RESOURCE_PREFIX),
            memory_mb: config.parsed_or(keys::WORKER_MEMORY_MB, 1024)?,
            cpu: config.parsed_or(keys::WORKER_CPU, 1.0)?,
            memory_request_factor: request_factor(config, keys::WORKER_MEMORY_REQUEST_FACTOR)?,
            cpu_request_factor: request_factor(config, keys::WORKER_CPU_REQUEST_FACTOR)?,
            rpc_port: config.parsed_or(keys::WORKER_RPC_PORT, defaults::WORKER_RPC_PORT)?,
            host_network_enabled: config.get_bool(keys::HOST_NETWORK_ENABLED, false)?,
            cluster_id,
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn image_pull_policy(&self) -> &str {
        &self.image_pull_policy
    }

    pub fn image_pull_secrets(&self) -> &[String] {
        &self.image_pull_secrets
    }

    pub fn service_account(&self) -> &str {
        &self.service_account
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn node_selector(&self) -> &BTreeMap<String, String> {
        &self.node_selector
    }

    pub fn tolerations(&self) -> &[Toleration] {
        &self.tolerations
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Named accelerator resources: platform resource key to amount.
    pub fn external_resources(&self) -> &BTreeMap<String, String> {
        &self.external_resources
    }

    pub fn memory_mb(&self) -> MemoryMb {
        self.memory_mb
    }

    pub fn cpu(&self) -> CpuCores {
        self.cpu
    }

    pub fn memory_request_factor(&self) -> f64 {
        self.memory_request_factor
    }

    pub fn cpu_request_factor(&self) -> f64 {
        self.cpu_request_factor
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port
    }

    pub fn host_network_enabled(&self) -> bool {
        self.host_network_enabled
    }
}
