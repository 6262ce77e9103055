//! Boundary to the container-orchestration platform.
//!
//! Everything that talks to Kubernetes goes through [`PlatformClient`]; the
//! lifecycle manager and client provider only ever see this trait, so tests
//! drive them with in-memory stubs and the production path uses
//! [`KubePlatformClient`].

mod kube;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;

use rill_types::defaults;

pub use self::kube::KubePlatformClient;

use crate::spec::DeploymentBundle;

/// Errors surfaced by platform-client implementations
#[derive(thiserror::Error, Debug)]
pub enum PlatformClientError {
    /// An API call against the platform failed, including failures to infer
    /// the client configuration from the environment.
    #[error("platform api error")]
    Api(#[from] ::kube::Error),
    /// A deployed resource is malformed with respect to what the deployment
    /// layer itself created (e.g. an admin service without ports).
    #[error("malformed platform resource: {0}")]
    MalformedResource(String),
    /// No node with a routable address was found while resolving a
    /// NodePort-exposed endpoint.
    #[error("no node with an ExternalIP or InternalIP address")]
    NoRoutableNode,
}

/// Resolved address and port of a cluster's administrative interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: String,
    port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The services a deployment owns, addressed per cluster id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    /// Externally reachable administrative service.
    Admin,
    /// Headless service used for in-cluster component discovery.
    Internal,
}

impl ServiceType {
    /// Name of the service instance for one cluster.
    pub fn service_name(&self, cluster_id: &str) -> String {
        match self {
            Self::Admin => format!("{}{}", cluster_id, defaults::ADMIN_SERVICE_SUFFIX),
            Self::Internal => format!("{}{}", cluster_id, defaults::INTERNAL_SERVICE_SUFFIX),
        }
    }
}

/// Operations the deployment layer needs from the orchestration platform.
///
/// All calls are network-bound and may fail transiently. Implementations are
/// expected to be cheap to clone behind an `Arc` and safe to share across
/// concurrent lifecycle operations.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Submits the coordinator's deployment bundle. The bundle is consumed;
    /// the platform owns the resources from here on.
    async fn create_coordinator(
        &self,
        bundle: DeploymentBundle,
    ) -> Result<(), PlatformClientError>;

    /// Deletes every resource belonging to `cluster_id`.
    async fn stop_and_cleanup(&self, cluster_id: &str) -> Result<(), PlatformClientError>;

    /// Resolves the externally reachable administrative endpoint of
    /// `cluster_id`, or `None` when the platform has nothing routable yet.
    async fn rest_endpoint(
        &self,
        cluster_id: &str,
    ) -> Result<Option<Endpoint>, PlatformClientError>;

    /// Fetches one of the cluster's services, if present.
    async fn service(
        &self,
        service_type: ServiceType,
        cluster_id: &str,
    ) -> Result<Option<Service>, PlatformClientError>;

    /// Releases resources held by the client itself (connections, watches).
    /// Deployed cluster state is untouched.
    async fn close(&self) -> Result<(), PlatformClientError>;

    /// Classification hook, invoked with the raw error before the caller
    /// wraps and re-raises it. Implementations log platform-specific detail
    /// here; the default does nothing.
    fn classify_error(&self, _err: &PlatformClientError) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_names_follow_cluster_id() {
        assert_eq!(
            ServiceType::Admin.service_name("pipeline-7"),
            "pipeline-7-admin"
        );
        assert_eq!(
            ServiceType::Internal.service_name("pipeline-7"),
            "pipeline-7-internal"
        );
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::new("10.1.2.3", 8081);
        assert_eq!(endpoint.to_string(), "10.1.2.3:8081");
    }
}
