//! Runs the step pipelines and packages the results for submission.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use tracing::debug;

use rill_types::defaults;

use super::params::{CoordinatorParameters, WorkerParameters};
use super::steps::{
    AdminServiceStep, InitCoordinatorStep, InitWorkerStep, InternalServiceStep, StartCommandStep,
};
use super::template::PodTemplate;
use super::{PodStep, SpecError};

/// The complete set of platform resources realizing one coordinator.
///
/// Created here, consumed exactly once by the platform client's create
/// operation; the platform owns the resources from then on.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentBundle {
    deployment: Deployment,
    accompanying_services: Vec<Service>,
}

impl DeploymentBundle {
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn accompanying_services(&self) -> &[Service] {
        &self.accompanying_services
    }

    pub fn into_parts(self) -> (Deployment, Vec<Service>) {
        (self.deployment, self.accompanying_services)
    }
}

fn seed_template(
    template_file: Option<&std::path::PathBuf>,
    main_container_name: &str,
) -> Result<PodTemplate, SpecError> {
    match template_file {
        Some(path) => PodTemplate::from_template_file(path, main_container_name),
        None => Ok(PodTemplate::default()),
    }
}

fn run_pipeline(
    seed: PodTemplate,
    steps: &[&dyn PodStep],
) -> Result<(PodTemplate, Vec<Service>), SpecError> {
    let mut services = Vec::new();
    let template = steps.iter().try_fold(seed, |template, step| {
        services.extend(step.accompanying_services()?);
        step.apply(template)
    })?;
    Ok((template, services))
}

/// Assembles the coordinator's deployment bundle.
///
/// Pipeline ordering contract: the initializer establishes the base pod and
/// container shape and must run first; the command step writes into the
/// container the initializer created; the service steps only read parameters
/// and may run in any position after construction of the parameters.
pub fn build_coordinator_bundle(
    params: &CoordinatorParameters,
) -> Result<DeploymentBundle, SpecError> {
    let seed = seed_template(
        params.pod_template_file(),
        defaults::COORDINATOR_CONTAINER_NAME,
    )?;

    let init = InitCoordinatorStep::new(params);
    let command = StartCommandStep::new(params);
    let internal = InternalServiceStep::new(params);
    let admin = AdminServiceStep::new(params);
    let steps: [&dyn PodStep; 4] = [&init, &command, &internal, &admin];

    let (template, accompanying_services) = run_pipeline(seed, &steps)?;
    let pod = template.into_pod();

    let mut deployment = Deployment::default();
    deployment.metadata.name = Some(params.pod_name());
    deployment.metadata.labels = Some(params.selector_labels());
    deployment.spec = Some(DeploymentSpec {
        replicas: Some(1),
        selector: LabelSelector {
            match_labels: Some(params.selector_labels()),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(pod.metadata),
            spec: pod.spec,
        },
        ..Default::default()
    });

    debug!(
        cluster_id = params.cluster_id(),
        services = accompanying_services.len(),
        "assembled coordinator deployment bundle"
    );

    Ok(DeploymentBundle {
        deployment,
        accompanying_services,
    })
}

/// Assembles one worker pod from a seed template (either empty or loaded
/// from a user-supplied manifest by the caller).
pub fn build_worker_pod(params: &WorkerParameters, seed: PodTemplate) -> Result<Pod, SpecError> {
    let init = InitWorkerStep::new(params);
    let steps: [&dyn PodStep; 1] = [&init];
    let (template, _) = run_pipeline(seed, &steps)?;
    Ok(template.into_pod())
}
