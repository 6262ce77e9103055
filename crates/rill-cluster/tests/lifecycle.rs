//! Lifecycle behavior of the cluster manager, driven against an in-memory
//! platform client that counts every call.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;

use rill_cluster::config::{keys, ApplicationConfig, Configuration};
use rill_cluster::platform::{Endpoint, PlatformClient, PlatformClientError, ServiceType};
use rill_cluster::spec::DeploymentBundle;
use rill_cluster::{ClusterError, ClusterManager, ClusterSpecification};

const CLUSTER_ID: &str = "pipeline-7";

fn api_error(message: &str) -> PlatformClientError {
    PlatformClientError::Api(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_owned(),
        message: message.to_owned(),
        reason: "InternalError".to_owned(),
        code: 500,
    }))
}

#[derive(Default)]
struct StubPlatform {
    create_calls: AtomicUsize,
    cleanup_calls: AtomicUsize,
    service_calls: AtomicUsize,
    endpoint_calls: AtomicUsize,
    close_calls: AtomicUsize,
    classify_calls: AtomicUsize,
    admin_service_exists: AtomicBool,
    fail_create: AtomicBool,
    fail_cleanup: AtomicBool,
    endpoint_available: AtomicBool,
}

impl StubPlatform {
    fn with_existing_deployment() -> Self {
        let stub = Self::default();
        stub.admin_service_exists.store(true, Ordering::SeqCst);
        stub.endpoint_available.store(true, Ordering::SeqCst);
        stub
    }

    fn failing_create(fail_cleanup: bool) -> Self {
        let stub = Self::default();
        stub.fail_create.store(true, Ordering::SeqCst);
        stub.fail_cleanup.store(fail_cleanup, Ordering::SeqCst);
        stub
    }

    fn platform_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
            + self.cleanup_calls.load(Ordering::SeqCst)
            + self.service_calls.load(Ordering::SeqCst)
            + self.endpoint_calls.load(Ordering::SeqCst)
            + self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformClient for StubPlatform {
    async fn create_coordinator(
        &self,
        _bundle: DeploymentBundle,
    ) -> Result<(), PlatformClientError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(api_error("simulated submit failure"));
        }
        self.admin_service_exists.store(true, Ordering::SeqCst);
        self.endpoint_available.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_and_cleanup(&self, _cluster_id: &str) -> Result<(), PlatformClientError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(api_error("simulated cleanup failure"));
        }
        self.admin_service_exists.store(false, Ordering::SeqCst);
        self.endpoint_available.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rest_endpoint(
        &self,
        _cluster_id: &str,
    ) -> Result<Option<Endpoint>, PlatformClientError> {
        self.endpoint_calls.fetch_add(1, Ordering::SeqCst);
        if self.endpoint_available.load(Ordering::SeqCst) {
            Ok(Some(Endpoint::new("10.96.0.17", 8081)))
        } else {
            Ok(None)
        }
    }

    async fn service(
        &self,
        service_type: ServiceType,
        _cluster_id: &str,
    ) -> Result<Option<Service>, PlatformClientError> {
        self.service_calls.fetch_add(1, Ordering::SeqCst);
        let exists = matches!(service_type, ServiceType::Admin)
            && self.admin_service_exists.load(Ordering::SeqCst);
        Ok(exists.then(Service::default))
    }

    async fn close(&self) -> Result<(), PlatformClientError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn classify_error(&self, _err: &PlatformClientError) {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn session_config() -> Configuration {
    let mut config = Configuration::new();
    config.set(keys::CLUSTER_ID, CLUSTER_ID);
    config
}

fn application_config() -> Configuration {
    let mut config = session_config();
    config.set(keys::DEPLOYMENT_TARGET, "application");
    config.set(keys::APPLICATION_ARTIFACTS, "s3://artifacts/tally.bundle");
    config
}

fn manager(config: Configuration, platform: Arc<StubPlatform>) -> ClusterManager {
    ClusterManager::new(config, platform).expect("manager")
}

fn sizing() -> ClusterSpecification {
    ClusterSpecification::builder().build().expect("sizing")
}

#[tokio::test]
async fn test_session_deploy_returns_working_provider() {
    let platform = Arc::new(StubPlatform::default());
    let manager = manager(session_config(), platform.clone());

    let provider = manager
        .deploy_session_cluster(&sizing())
        .await
        .expect("deploy succeeds");

    assert_eq!(platform.create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(platform.cleanup_calls.load(Ordering::SeqCst), 0);

    let client = provider.cluster_client().await.expect("client");
    assert_eq!(client.web_interface_url(), "http://10.96.0.17:8081");
    assert_eq!(client.cluster_id(), CLUSTER_ID);
}

#[tokio::test]
async fn test_second_application_deploy_is_rejected() {
    let platform = Arc::new(StubPlatform::default());
    let manager = manager(application_config(), platform.clone());
    let app = ApplicationConfig::new(Some("com.example.Tally".to_owned()), vec![]);

    manager
        .deploy_application_cluster(&sizing(), &app)
        .await
        .expect("first deploy succeeds");

    let second = manager.deploy_application_cluster(&sizing(), &app).await;
    assert!(matches!(
        second,
        Err(ClusterError::AlreadyExists(id)) if id == CLUSTER_ID
    ));
    // the second attempt stopped at the existence check
    assert_eq!(platform.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_job_cluster_mode_is_unsupported() {
    let platform = Arc::new(StubPlatform::default());
    let manager = manager(session_config(), platform.clone());

    let result = manager.deploy_job_cluster(&sizing()).await;
    assert!(matches!(result, Err(ClusterError::UnsupportedMode(_))));
    assert_eq!(platform.platform_calls(), 0);
}

#[tokio::test]
async fn test_application_deploy_requires_application_target() {
    let platform = Arc::new(StubPlatform::default());
    // deployment target defaults to `session`
    let manager = manager(session_config(), platform.clone());
    let app = ApplicationConfig::new(Some("com.example.Tally".to_owned()), vec![]);

    let result = manager.deploy_application_cluster(&sizing(), &app).await;
    assert!(matches!(result, Err(ClusterError::ModeMismatch { .. })));
    assert_eq!(platform.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_application_deploy_requires_exactly_one_artifact() {
    let platform = Arc::new(StubPlatform::default());
    let mut config = application_config();
    config.set(
        keys::APPLICATION_ARTIFACTS,
        "s3://artifacts/tally.bundle;s3://artifacts/extra.bundle",
    );
    let manager = manager(config, platform.clone());
    let app = ApplicationConfig::new(Some("com.example.Tally".to_owned()), vec![]);

    let result = manager.deploy_application_cluster(&sizing(), &app).await;
    assert!(matches!(
        result,
        Err(ClusterError::ArtifactCountInvalid { found: 2, .. })
    ));
    assert_eq!(platform.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_script_payload_skips_artifact_validation() {
    let platform = Arc::new(StubPlatform::default());
    let mut config = session_config();
    config.set(keys::DEPLOYMENT_TARGET, "application");
    let manager = manager(config, platform.clone());
    let app = ApplicationConfig::new(None, vec!["--script".to_owned(), "job.lua".to_owned()]);

    manager
        .deploy_application_cluster(&sizing(), &app)
        .await
        .expect("script deploy succeeds without artifacts");
    assert_eq!(platform.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_submit_failure_triggers_one_cleanup_and_reports_original_cause() {
    let platform = Arc::new(StubPlatform::failing_create(false));
    let manager = manager(session_config(), platform.clone());

    let result = manager.deploy_session_cluster(&sizing()).await;
    let err = result.expect_err("deploy fails");

    assert_eq!(platform.cleanup_calls.load(Ordering::SeqCst), 1);
    match err {
        ClusterError::DeploymentFailed { cluster_id, source } => {
            assert_eq!(cluster_id, CLUSTER_ID);
            assert!(format!("{source:?}").contains("simulated submit failure"));
        }
        other => panic!("expected DeploymentFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cleanup_failure_does_not_mask_original_cause() {
    let platform = Arc::new(StubPlatform::failing_create(true));
    let manager = manager(session_config(), platform.clone());

    let err = manager
        .deploy_session_cluster(&sizing())
        .await
        .expect_err("deploy fails");

    assert_eq!(platform.cleanup_calls.load(Ordering::SeqCst), 1);
    match err {
        ClusterError::DeploymentFailed { source, .. } => {
            let rendered = format!("{source:?}");
            assert!(rendered.contains("simulated submit failure"));
            assert!(!rendered.contains("simulated cleanup failure"));
        }
        other => panic!("expected DeploymentFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_retrieve_without_endpoint_fails_fast() {
    let platform = Arc::new(StubPlatform::default());
    let manager = manager(session_config(), platform.clone());

    let result = manager.retrieve().await;
    assert!(matches!(
        result,
        Err(ClusterError::EndpointUnavailable(id)) if id == CLUSTER_ID
    ));
    assert_eq!(platform.endpoint_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retrieve_existing_cluster() {
    let platform = Arc::new(StubPlatform::with_existing_deployment());
    let manager = manager(session_config(), platform.clone());

    let provider = manager.retrieve().await.expect("retrieve succeeds");
    let client = provider.cluster_client().await.expect("client");
    assert_eq!(client.endpoint().address(), "10.96.0.17");
    // each acquisition re-resolves the endpoint
    assert_eq!(platform.endpoint_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_kill_failure_is_classified_then_wrapped() {
    let platform = Arc::new(StubPlatform::default());
    platform.fail_cleanup.store(true, Ordering::SeqCst);
    let manager = manager(session_config(), platform.clone());

    let result = manager.kill_cluster().await;
    assert!(matches!(result, Err(ClusterError::KillFailed { .. })));
    assert_eq!(platform.classify_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_swallows_failures() {
    let platform = Arc::new(StubPlatform::default());
    let manager = manager(session_config(), platform.clone());

    manager.close().await;
    assert_eq!(platform.close_calls.load(Ordering::SeqCst), 1);
}
