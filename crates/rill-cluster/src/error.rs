use rill_types::ClusterId;

use crate::config::{ConfigError, DeploymentTarget};
use crate::platform::PlatformClientError;
use crate::spec::SpecError;

/// The types of errors that can occur during cluster lifecycle management
#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    /// A coordinator deployment already exists under this cluster id.
    #[error("cluster '{0}' already exists")]
    AlreadyExists(ClusterId),
    /// The configured deployment target does not match the requested
    /// operation.
    #[error(
        "could not deploy cluster '{cluster_id}': expected deployment target \
         '{expected}' but the configured target is '{actual}'"
    )]
    ModeMismatch {
        cluster_id: ClusterId,
        expected: DeploymentTarget,
        actual: DeploymentTarget,
    },
    /// Application deployments must resolve exactly one artifact.
    #[error(
        "could not deploy cluster '{cluster_id}': expected exactly one application \
         artifact, found {found}"
    )]
    ArtifactCountInvalid { cluster_id: ClusterId, found: usize },
    /// Per-job clusters are intentionally unsupported by this deployment
    /// style.
    #[error("cluster '{0}': per-job clusters are not supported by Kubernetes deployments")]
    UnsupportedMode(ClusterId),
    /// Submission failed; residual resources were cleaned up best-effort and
    /// the original cause is preserved here.
    #[error("could not create cluster '{cluster_id}'")]
    DeploymentFailed {
        cluster_id: ClusterId,
        #[source]
        source: Box<ClusterError>,
    },
    /// The platform has no resolvable admin endpoint for the cluster.
    #[error("could not resolve the admin endpoint of cluster '{0}'")]
    EndpointUnavailable(ClusterId),
    /// Resource deletion failed on the platform side.
    #[error("could not kill cluster '{cluster_id}'")]
    KillFailed {
        cluster_id: ClusterId,
        #[source]
        source: PlatformClientError,
    },
    /// A manager cannot be constructed without a cluster id.
    #[error("'kubernetes.cluster-id' must be specified")]
    MissingClusterId,
    /// An error occurred while talking to the platform.
    #[error(transparent)]
    Platform(#[from] PlatformClientError),
    /// An error occurred while assembling the deployment specification.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// An error occurred while reading the working configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
