//! The individual pipeline steps.
//!
//! Each step contributes one concern to the pod specification. Ordering
//! constraints are documented on the step that carries them and wired up in
//! [`super::factory`].

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ContainerPort, EnvVar, EnvVarSource, LocalObjectReference, ObjectFieldSelector,
    ResourceRequirements, Service, ServicePort, ServiceSpec, Toleration,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use rill_types::defaults;

use super::params::{CoordinatorParameters, WorkerParameters};
use super::template::PodTemplate;
use super::{PodStep, SpecError};

/// Requests are derived from the configured ceiling as `limit × factor`,
/// rounded to the nearest MiB for memory. Named external resources always
/// request exactly their configured amount.
fn build_resource_requirements(
    memory_mb: u32,
    memory_factor: f64,
    cpu: f64,
    cpu_factor: f64,
    external_resources: &BTreeMap<String, String>,
) -> ResourceRequirements {
    let requested_memory_mb = (f64::from(memory_mb) * memory_factor).round() as u64;

    let mut limits = BTreeMap::from([
        ("memory".to_owned(), Quantity(format!("{memory_mb}Mi"))),
        ("cpu".to_owned(), Quantity(cpu.to_string())),
    ]);
    let mut requests = BTreeMap::from([
        (
            "memory".to_owned(),
            Quantity(format!("{requested_memory_mb}Mi")),
        ),
        ("cpu".to_owned(), Quantity((cpu * cpu_factor).to_string())),
    ]);

    for (name, amount) in external_resources {
        limits.insert(name.clone(), Quantity(amount.clone()));
        requests.insert(name.clone(), Quantity(amount.clone()));
    }

    ResourceRequirements {
        limits: Some(limits),
        requests: Some(requests),
        ..Default::default()
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some(defaults::POD_API_VERSION.to_owned()),
                field_path: field_path.to_owned(),
            }),
            ..Default::default()
        }),
    }
}

/// User entries first (mapping-iteration order), then the three entries the
/// platform always needs, appended last so user configuration cannot shadow
/// them: the host address, the pod's own address (both resolved by the
/// platform at pod start) and the cluster id.
fn build_environment(user_env: &BTreeMap<String, String>, cluster_id: &str) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = user_env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect();

    env.push(field_ref_env(
        defaults::RILL_HOST_IP,
        defaults::HOST_IP_FIELD_PATH,
    ));
    env.push(field_ref_env(
        defaults::RILL_POD_IP,
        defaults::POD_IP_FIELD_PATH,
    ));
    env.push(EnvVar {
        name: defaults::RILL_CLUSTER_ID.to_owned(),
        value: Some(cluster_id.to_owned()),
        value_from: None,
    });
    env
}

fn image_pull_secret_refs(secrets: &[String]) -> Option<Vec<LocalObjectReference>> {
    if secrets.is_empty() {
        return None;
    }
    Some(
        secrets
            .iter()
            .map(|name| LocalObjectReference {
                name: name.clone(),
            })
            .collect(),
    )
}

/// Shared body of the two initializers. `rpc_ports` is what the component
/// would declare when host networking is off; the host-network flag controls
/// the port list and DNS policy together, in one branch, because an
/// inconsistent combination of the two breaks platform routing.
#[allow(clippy::too_many_arguments)]
fn initialize_pod(
    template: PodTemplate,
    pod_name: String,
    container_name: &str,
    restart_policy: &str,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    service_account: &str,
    image_pull_secrets: &[String],
    node_selector: &BTreeMap<String, String>,
    tolerations: &[Toleration],
    host_network_enabled: bool,
    rpc_ports: Vec<ContainerPort>,
    image: &str,
    image_pull_policy: &str,
    resources: ResourceRequirements,
    environment: Vec<EnvVar>,
) -> PodTemplate {
    let mut pod = template.pod().clone();

    pod.metadata.name = Some(pod_name);
    let pod_labels = pod.metadata.labels.get_or_insert_with(Default::default);
    pod_labels.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    if !annotations.is_empty() {
        let pod_annotations = pod
            .metadata
            .annotations
            .get_or_insert_with(Default::default);
        pod_annotations.extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let pod_spec = pod.spec.get_or_insert_with(Default::default);
    pod_spec.service_account_name = Some(service_account.to_owned());
    pod_spec.restart_policy = Some(restart_policy.to_owned());
    pod_spec.host_network = Some(host_network_enabled);
    let (ports, dns_policy) = if host_network_enabled {
        (None, defaults::DNS_POLICY_HOST_NETWORK)
    } else {
        (Some(rpc_ports), defaults::DNS_POLICY_DEFAULT)
    };
    pod_spec.dns_policy = Some(dns_policy.to_owned());
    if let Some(secrets) = image_pull_secret_refs(image_pull_secrets) {
        pod_spec.image_pull_secrets = Some(secrets);
    }
    if !node_selector.is_empty() {
        pod_spec.node_selector = Some(node_selector.clone());
    }
    if !tolerations.is_empty() {
        pod_spec.tolerations = Some(tolerations.to_vec());
    }

    let mut container = template.main_container().clone();
    container.name = container_name.to_owned();
    container.image = Some(image.to_owned());
    container.image_pull_policy = Some(image_pull_policy.to_owned());
    container.resources = Some(resources);
    container.ports = ports;
    container.env = Some(environment);

    template.with_pod(pod).with_main_container(container)
}

fn named_port(name: &str, port: u16) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_owned()),
        container_port: i32::from(port),
        ..Default::default()
    }
}

/// Establishes the coordinator's base pod shape: identity, scheduling
/// constraints, network mode, the main container stub with resources, ports
/// and environment. Must run before any step that augments those fields.
pub struct InitCoordinatorStep<'a> {
    params: &'a CoordinatorParameters,
}

impl<'a> InitCoordinatorStep<'a> {
    pub fn new(params: &'a CoordinatorParameters) -> Self {
        Self { params }
    }
}

impl PodStep for InitCoordinatorStep<'_> {
    fn apply(&self, template: PodTemplate) -> Result<PodTemplate, SpecError> {
        let params = self.params;
        let resources = build_resource_requirements(
            params.memory_mb(),
            params.memory_request_factor(),
            params.cpu(),
            params.cpu_request_factor(),
            &BTreeMap::new(),
        );
        Ok(initialize_pod(
            template,
            params.pod_name(),
            defaults::COORDINATOR_CONTAINER_NAME,
            defaults::RESTART_POLICY_ALWAYS,
            params.labels(),
            params.annotations(),
            params.service_account(),
            params.image_pull_secrets(),
            params.node_selector(),
            params.tolerations(),
            params.host_network_enabled(),
            vec![
                named_port(defaults::COORDINATOR_RPC_PORT_NAME, params.rpc_port()),
                named_port(defaults::ARTIFACT_SERVER_PORT_NAME, params.artifact_port()),
                named_port(defaults::ADMIN_PORT_NAME, params.admin_port()),
            ],
            params.image(),
            params.image_pull_policy(),
            resources,
            build_environment(params.environment(), params.cluster_id()),
        ))
    }
}

/// Establishes the worker's base pod shape, analogously to
/// [`InitCoordinatorStep`]. Workers declare only their RPC port and are
/// never restarted in place; the coordinator replaces failed pods instead.
pub struct InitWorkerStep<'a> {
    params: &'a WorkerParameters,
}

impl<'a> InitWorkerStep<'a> {
    pub fn new(params: &'a WorkerParameters) -> Self {
        Self { params }
    }
}

impl PodStep for InitWorkerStep<'_> {
    fn apply(&self, template: PodTemplate) -> Result<PodTemplate, SpecError> {
        let params = self.params;
        let resources = build_resource_requirements(
            params.memory_mb(),
            params.memory_request_factor(),
            params.cpu(),
            params.cpu_request_factor(),
            params.external_resources(),
        );
        Ok(initialize_pod(
            template,
            params.pod_name().to_owned(),
            defaults::WORKER_CONTAINER_NAME,
            defaults::RESTART_POLICY_NEVER,
            params.labels(),
            params.annotations(),
            params.service_account(),
            params.image_pull_secrets(),
            params.node_selector(),
            params.tolerations(),
            params.host_network_enabled(),
            vec![named_port(defaults::WORKER_RPC_PORT_NAME, params.rpc_port())],
            params.image(),
            params.image_pull_policy(),
            resources,
            build_environment(params.environment(), params.cluster_id()),
        ))
    }
}

/// Sets the main-container command to the coordinator launcher with the
/// configured entrypoint flavor. Runs after the initializer, which owns the
/// container stub it writes into.
pub struct StartCommandStep<'a> {
    params: &'a CoordinatorParameters,
}

impl<'a> StartCommandStep<'a> {
    pub fn new(params: &'a CoordinatorParameters) -> Self {
        Self { params }
    }
}

impl PodStep for StartCommandStep<'_> {
    fn apply(&self, template: PodTemplate) -> Result<PodTemplate, SpecError> {
        let mut container = template.main_container().clone();
        container.command = Some(vec![defaults::COORDINATOR_START_SCRIPT.to_owned()]);
        container.args = Some(vec![
            self.params.entrypoint().to_owned(),
            "--workers".to_owned(),
            self.params.worker_count().to_string(),
        ]);
        Ok(template.with_main_container(container))
    }
}

fn service_port(name: &str, port: u16) -> ServicePort {
    ServicePort {
        name: Some(name.to_owned()),
        port: i32::from(port),
        target_port: Some(IntOrString::String(name.to_owned())),
        ..Default::default()
    }
}

/// Contributes the headless discovery service other components use to reach
/// the coordinator inside the cluster network. Leaves the pod untouched.
pub struct InternalServiceStep<'a> {
    params: &'a CoordinatorParameters,
}

impl<'a> InternalServiceStep<'a> {
    pub fn new(params: &'a CoordinatorParameters) -> Self {
        Self { params }
    }
}

impl PodStep for InternalServiceStep<'_> {
    fn apply(&self, template: PodTemplate) -> Result<PodTemplate, SpecError> {
        Ok(template)
    }

    fn accompanying_services(&self) -> Result<Vec<Service>, SpecError> {
        let params = self.params;
        let mut service = Service::default();
        service.metadata.name = Some(
            crate::platform::ServiceType::Internal.service_name(params.cluster_id()),
        );
        service.metadata.labels = Some(params.selector_labels());
        service.spec = Some(ServiceSpec {
            // headless: discovery happens via DNS records, not a virtual ip
            cluster_ip: Some("None".to_owned()),
            selector: Some(params.selector_labels()),
            ports: Some(vec![
                service_port(defaults::COORDINATOR_RPC_PORT_NAME, params.rpc_port()),
                service_port(defaults::ARTIFACT_SERVER_PORT_NAME, params.artifact_port()),
            ]),
            ..Default::default()
        });
        Ok(vec![service])
    }
}

/// Contributes the administrative service with the configured exposure type.
/// Endpoint discovery on retrieval resolves against this service.
pub struct AdminServiceStep<'a> {
    params: &'a CoordinatorParameters,
}

impl<'a> AdminServiceStep<'a> {
    pub fn new(params: &'a CoordinatorParameters) -> Self {
        Self { params }
    }
}

impl PodStep for AdminServiceStep<'_> {
    fn apply(&self, template: PodTemplate) -> Result<PodTemplate, SpecError> {
        Ok(template)
    }

    fn accompanying_services(&self) -> Result<Vec<Service>, SpecError> {
        let params = self.params;
        let mut service = Service::default();
        service.metadata.name =
            Some(crate::platform::ServiceType::Admin.service_name(params.cluster_id()));
        service.metadata.labels = Some(params.selector_labels());
        service.spec = Some(ServiceSpec {
            type_: Some(params.admin_service_exposed_type().as_str().to_owned()),
            selector: Some(params.selector_labels()),
            ports: Some(vec![service_port(
                defaults::ADMIN_PORT_NAME,
                params.admin_port(),
            )]),
            ..Default::default()
        });
        Ok(vec![service])
    }
}
