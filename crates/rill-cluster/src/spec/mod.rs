//! Assembly of the declarative resource specifications.
//!
//! A deployment bundle is produced by folding an ordered list of independent
//! steps over a seed [`PodTemplate`]. Each step contributes exactly one
//! configuration concern (identity, networking, resources, environment,
//! command) and knows nothing about the others beyond the documented
//! ordering contract; see [`factory`] for the canonical pipelines.

pub mod factory;
pub mod params;
pub mod steps;
pub mod template;

pub use factory::{build_coordinator_bundle, build_worker_pod, DeploymentBundle};
pub use params::{
    ClusterSpecification, ClusterSpecificationBuilder, CoordinatorParameters, WorkerParameters,
};
pub use template::PodTemplate;

use k8s_openapi::api::core::v1::Service;

use crate::config::ConfigError;

/// Errors raised while deriving parameters or assembling specifications
#[derive(thiserror::Error, Debug)]
pub enum SpecError {
    #[error("missing required option '{0}'")]
    MissingOption(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid request factor {value} for '{key}', must be within (0, 1]")]
    InvalidRequestFactor { key: &'static str, value: f64 },
    #[error("invalid toleration '{0}', expected key[=value][:effect]")]
    InvalidToleration(String),
    #[error("could not read pod template {path}")]
    TemplateRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse pod template {path}")]
    TemplateParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// One transformation step of the specification pipeline.
///
/// Steps are pure with respect to the platform: they shape in-memory state
/// and never perform I/O. A step must not remove fields written by an
/// earlier step unless overriding them is its declared purpose, and must be
/// order-independent with respect to fields it does not touch.
pub trait PodStep {
    /// Returns a new template with this step's fields populated.
    fn apply(&self, template: PodTemplate) -> Result<PodTemplate, SpecError>;

    /// Accessory resources this step contributes alongside the pod
    /// (e.g. a discovery service). Most steps contribute none.
    fn accompanying_services(&self) -> Result<Vec<Service>, SpecError> {
        Ok(Vec::new())
    }
}
