//! The cluster lifecycle manager.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use rill_types::defaults;
use rill_types::ClusterId;

use crate::config::{
    ensure_fixed_port, high_availability_active, keys, ApplicationConfig, Configuration,
    DeploymentTarget,
};
use crate::error::ClusterError;
use crate::platform::{PlatformClient, ServiceType};
use crate::provider::ClusterClientProvider;
use crate::spec::{build_coordinator_bundle, ClusterSpecification, CoordinatorParameters};

/// Deploys, retrieves and tears down one Rill cluster on Kubernetes.
///
/// A manager is bound to a single cluster id for its lifetime. It holds no
/// internal locks: operations for different cluster ids may run concurrently,
/// but concurrent deploys of the SAME id are not serialized here and must be
/// serialized by the caller (or rejected by the platform's conflict
/// detection).
pub struct ClusterManager {
    config: Configuration,
    platform: Arc<dyn PlatformClient>,
    cluster_id: ClusterId,
}

impl ClusterManager {
    /// Creates a manager over the given working configuration and platform
    /// client. The configuration must carry `kubernetes.cluster-id`.
    pub fn new(
        config: Configuration,
        platform: Arc<dyn PlatformClient>,
    ) -> Result<Self, ClusterError> {
        let cluster_id = config
            .get(keys::CLUSTER_ID)
            .ok_or(ClusterError::MissingClusterId)?
            .to_owned();
        Ok(Self {
            config,
            platform,
            cluster_id,
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Resolves the admin endpoint of an existing deployment and returns the
    /// client provider bound to it.
    #[instrument(skip(self), fields(cluster_id = %self.cluster_id))]
    pub async fn retrieve(&self) -> Result<ClusterClientProvider, ClusterError> {
        let provider = self.cluster_client_provider();
        let client = provider.cluster_client().await?;
        info!(
            cluster_id = %self.cluster_id,
            web_interface = %client.web_interface_url(),
            "retrieved cluster"
        );
        Ok(provider)
    }

    /// Deploys a long-lived coordinator that accepts any number of jobs over
    /// its lifetime.
    #[instrument(skip(self, cluster_spec), fields(cluster_id = %self.cluster_id))]
    pub async fn deploy_session_cluster(
        &self,
        cluster_spec: &ClusterSpecification,
    ) -> Result<ClusterClientProvider, ClusterError> {
        let provider = self
            .deploy_cluster_internal(
                defaults::SESSION_ENTRYPOINT,
                cluster_spec,
                false,
                self.config.clone(),
            )
            .await?;

        let client = provider.cluster_client().await?;
        info!(
            cluster_id = %self.cluster_id,
            web_interface = %client.web_interface_url(),
            "created session cluster"
        );
        Ok(provider)
    }

    /// Deploys a coordinator dedicated to one pre-packaged application.
    ///
    /// Preconditions are checked in order and fail fast, before any
    /// platform submission: no existing deployment under this id, the
    /// configured deployment target is `application`, and (for non-script
    /// payloads) exactly one application artifact is configured.
    #[instrument(skip(self, cluster_spec, app_config), fields(cluster_id = %self.cluster_id))]
    pub async fn deploy_application_cluster(
        &self,
        cluster_spec: &ClusterSpecification,
        app_config: &ApplicationConfig,
    ) -> Result<ClusterClientProvider, ClusterError> {
        if self
            .platform
            .service(ServiceType::Admin, &self.cluster_id)
            .await?
            .is_some()
        {
            return Err(ClusterError::AlreadyExists(self.cluster_id.clone()));
        }

        let target = DeploymentTarget::from_config(&self.config)?;
        if target != DeploymentTarget::Application {
            return Err(ClusterError::ModeMismatch {
                cluster_id: self.cluster_id.clone(),
                expected: DeploymentTarget::Application,
                actual: target,
            });
        }

        // Script payloads run through the bundled script runner and carry no
        // artifact of their own.
        if !app_config.is_script_payload() {
            let artifacts = self.config.get_list(keys::APPLICATION_ARTIFACTS);
            if artifacts.len() != 1 {
                return Err(ClusterError::ArtifactCountInvalid {
                    cluster_id: self.cluster_id.clone(),
                    found: artifacts.len(),
                });
            }
        }

        let mut config = self.config.clone();
        app_config.apply_to_configuration(&mut config);

        let provider = self
            .deploy_cluster_internal(defaults::APPLICATION_ENTRYPOINT, cluster_spec, false, config)
            .await?;

        let client = provider.cluster_client().await?;
        info!(
            cluster_id = %self.cluster_id,
            web_interface = %client.web_interface_url(),
            "created application cluster"
        );
        Ok(provider)
    }

    /// Per-job clusters are not supported by this deployment style; this
    /// fails before any platform interaction so callers do not pay for an
    /// expensive submission first.
    pub async fn deploy_job_cluster(
        &self,
        _cluster_spec: &ClusterSpecification,
    ) -> Result<ClusterClientProvider, ClusterError> {
        Err(ClusterError::UnsupportedMode(self.cluster_id.clone()))
    }

    /// Requests deletion of all platform resources belonging to this
    /// cluster.
    #[instrument(skip(self), fields(cluster_id = %self.cluster_id))]
    pub async fn kill_cluster(&self) -> Result<(), ClusterError> {
        if let Err(err) = self.platform.stop_and_cleanup(&self.cluster_id).await {
            self.platform.classify_error(&err);
            return Err(ClusterError::KillFailed {
                cluster_id: self.cluster_id.clone(),
                source: err,
            });
        }
        Ok(())
    }

    /// Releases the platform client's own resources. Best-effort: failures
    /// are logged, never raised, so teardown cannot block caller shutdown.
    pub async fn close(&self) {
        if let Err(err) = self.platform.close().await {
            self.platform.classify_error(&err);
            error!(cluster_id = %self.cluster_id, error = %err, "failed to close platform client");
        }
    }

    /// Shared deploy routine. Takes ownership of a per-deployment copy of
    /// the working configuration so concurrent operations never alias
    /// mutable state.
    async fn deploy_cluster_internal(
        &self,
        entrypoint: &str,
        cluster_spec: &ClusterSpecification,
        detached: bool,
        mut config: Configuration,
    ) -> Result<ClusterClientProvider, ClusterError> {
        let execution_mode = if detached { "detached" } else { "normal" };
        config.set(keys::EXECUTION_MODE, execution_mode);
        config.set(keys::ENTRYPOINT, entrypoint);

        // Worker RPC, artifact transfer and admin ports are exposed through
        // services and must be deterministic.
        ensure_fixed_port(&mut config, keys::WORKER_RPC_PORT, defaults::WORKER_RPC_PORT);
        ensure_fixed_port(
            &mut config,
            keys::ARTIFACT_SERVER_PORT,
            defaults::ARTIFACT_SERVER_PORT,
        );
        ensure_fixed_port(&mut config, keys::ADMIN_BIND_PORT, defaults::ADMIN_PORT);

        if high_availability_active(&config) {
            config.set(keys::HIGH_AVAILABILITY_CLUSTER_ID, &self.cluster_id);
            let coordinator_rpc_port = config.parsed_or(
                keys::COORDINATOR_RPC_PORT,
                defaults::COORDINATOR_RPC_PORT,
            )?;
            ensure_fixed_port(
                &mut config,
                keys::HIGH_AVAILABILITY_PORT_RANGE,
                coordinator_rpc_port,
            );
        }

        let submit = async {
            let params = CoordinatorParameters::from_configuration(&config, cluster_spec)?;
            let bundle = build_coordinator_bundle(&params)?;
            self.platform.create_coordinator(bundle).await?;
            Ok::<(), ClusterError>(())
        };

        if let Err(source) = submit.await {
            warn!(
                cluster_id = %self.cluster_id,
                "failed to create the Kubernetes cluster, cleaning up residual resources"
            );
            if let Err(cleanup_err) = self.platform.stop_and_cleanup(&self.cluster_id).await {
                // the caller gets the original cause, not the cleanup's
                info!(
                    cluster_id = %self.cluster_id,
                    error = %cleanup_err,
                    "failed to clean up residual cluster resources"
                );
            }
            return Err(ClusterError::DeploymentFailed {
                cluster_id: self.cluster_id.clone(),
                source: Box::new(source),
            });
        }

        Ok(self.cluster_client_provider())
    }

    fn cluster_client_provider(&self) -> ClusterClientProvider {
        ClusterClientProvider::new(
            self.config.clone(),
            self.cluster_id.clone(),
            Arc::clone(&self.platform),
        )
    }
}
