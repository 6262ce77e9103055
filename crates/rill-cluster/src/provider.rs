//! Deferred construction of administrative cluster clients.

use std::sync::Arc;

use tracing::{debug, warn};

use rill_types::ClusterId;

use crate::config::{keys, Configuration, ServiceExposedType};
use crate::error::ClusterError;
use crate::platform::{Endpoint, PlatformClient};

/// Deferred factory for administrative clients of one cluster.
///
/// The provider never caches an endpoint: every [`cluster_client`] call
/// re-resolves it through the platform, because the underlying address can
/// legitimately be absent or change (e.g. a load-balancer reassignment).
///
/// [`cluster_client`]: ClusterClientProvider::cluster_client
pub struct ClusterClientProvider {
    config: Configuration,
    cluster_id: ClusterId,
    platform: Arc<dyn PlatformClient>,
}

impl std::fmt::Debug for ClusterClientProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClientProvider")
            .field("config", &self.config)
            .field("cluster_id", &self.cluster_id)
            .finish_non_exhaustive()
    }
}

impl ClusterClientProvider {
    pub(crate) fn new(
        config: Configuration,
        cluster_id: ClusterId,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            config,
            cluster_id,
            platform,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Resolves the current admin endpoint and constructs a client bound to
    /// it. Fails with [`ClusterError::EndpointUnavailable`] when the platform
    /// has nothing routable; no client is constructed in that case.
    pub async fn cluster_client(&self) -> Result<ClusterClient, ClusterError> {
        let endpoint = match self.platform.rest_endpoint(&self.cluster_id).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return Err(ClusterError::EndpointUnavailable(self.cluster_id.clone())),
            Err(err) => {
                self.platform.classify_error(&err);
                return Err(err.into());
            }
        };
        debug!(cluster_id = %self.cluster_id, %endpoint, "resolved admin endpoint");

        let mut config = self.config.clone();
        config.set(keys::ADMIN_ADDRESS, endpoint.address());
        config.set(keys::ADMIN_PORT, endpoint.port());

        if ServiceExposedType::from_config(&config)?.is_cluster_internal() {
            warn!(
                cluster_id = %self.cluster_id,
                "administrative operations (e.g. cancel, list, savepoint) won't work from \
                 outside the Kubernetes cluster since '{}' is set to '{}'",
                keys::ADMIN_SERVICE_EXPOSED_TYPE,
                ServiceExposedType::ClusterIp,
            );
        }

        Ok(ClusterClient::new(self.cluster_id.clone(), endpoint, config))
    }
}

/// Administrative client handle for one running cluster, bound strictly to
/// the endpoint that was resolved at construction time.
///
/// The client is a scoped acquisition: hold it only for the duration of the
/// administrative interaction and let it drop afterwards, then re-acquire
/// through the provider when needed again.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    cluster_id: ClusterId,
    endpoint: Endpoint,
    config: Configuration,
}

impl ClusterClient {
    fn new(cluster_id: ClusterId, endpoint: Endpoint, config: Configuration) -> Self {
        Self {
            cluster_id,
            endpoint,
            config,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The working configuration this client was constructed with, including
    /// the resolved admin address and port.
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn web_interface_url(&self) -> String {
        format!("http://{}", self.endpoint)
    }
}
