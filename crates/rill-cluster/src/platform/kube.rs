//! `kube`-backed platform client.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::{debug, info, instrument, warn};

use rill_types::defaults;

use crate::spec::DeploymentBundle;

use super::{Endpoint, PlatformClient, PlatformClientError, ServiceType};

/// Talks to a real Kubernetes cluster through the ambient client
/// configuration (kubeconfig or in-cluster environment).
#[derive(Clone)]
pub struct KubePlatformClient {
    client: Client,
    namespace: String,
}

impl KubePlatformClient {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Infers the client configuration from the environment.
    pub async fn from_inferred_config(
        namespace: impl Into<String>,
    ) -> Result<Self, PlatformClientError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Label selector matching every resource of one cluster.
    fn cluster_selector(cluster_id: &str) -> String {
        format!("app={},cluster={}", defaults::PRODUCT_NAME, cluster_id)
    }

    /// First routable node address, preferring external over internal ones.
    async fn node_address(&self) -> Result<Option<String>, PlatformClientError> {
        let nodes = Api::<Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await?;

        let mut addresses = Vec::new();
        for node in nodes.items {
            if let Some(node_addresses) = node.status.and_then(|status| status.addresses) {
                addresses.extend(node_addresses);
            }
        }

        let address = addresses
            .iter()
            .find(|address| address.type_ == "ExternalIP")
            .or_else(|| {
                debug!("no ExternalIP found, searching InternalIPs");
                addresses
                    .iter()
                    .find(|address| address.type_ == "InternalIP")
            });
        Ok(address.map(|address| address.address.clone()))
    }
}

/// Resolves the externally reachable endpoint from an admin service, given
/// the node address to use for NodePort exposure. Returns `None` while the
/// platform has not assigned anything routable yet (pending load-balancer
/// ingress, unassigned cluster ip).
fn endpoint_from_service(
    service: &Service,
    node_address: Option<&str>,
) -> Result<Option<Endpoint>, PlatformClientError> {
    let spec = service.spec.as_ref().ok_or_else(|| {
        PlatformClientError::MalformedResource("admin service has no spec".to_owned())
    })?;
    let port = spec
        .ports
        .as_ref()
        .and_then(|ports| ports.first())
        .ok_or_else(|| {
            PlatformClientError::MalformedResource("admin service has no ports".to_owned())
        })?;
    let service_port = u16::try_from(port.port).map_err(|_| {
        PlatformClientError::MalformedResource(format!(
            "admin service port {} out of range",
            port.port
        ))
    })?;

    match spec.type_.as_deref() {
        Some("NodePort") => {
            let Some(node_port) = port.node_port else {
                return Ok(None);
            };
            let node_port = u16::try_from(node_port).map_err(|_| {
                PlatformClientError::MalformedResource(format!(
                    "node port {node_port} out of range"
                ))
            })?;
            let address = node_address.ok_or(PlatformClientError::NoRoutableNode)?;
            Ok(Some(Endpoint::new(address, node_port)))
        }
        Some("LoadBalancer") => {
            let ingress_host = service
                .status
                .as_ref()
                .and_then(|status| status.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|ingress| {
                    ingress
                        .iter()
                        .find_map(|entry| entry.hostname.clone().or_else(|| entry.ip.clone()))
                });
            Ok(ingress_host.map(|host| Endpoint::new(host, service_port)))
        }
        // ClusterIP and unset types route over the virtual service ip
        _ => match spec.cluster_ip.as_deref() {
            Some(ip) if !ip.is_empty() && ip != "None" => {
                Ok(Some(Endpoint::new(ip, service_port)))
            }
            _ => Ok(None),
        },
    }
}

#[async_trait]
impl PlatformClient for KubePlatformClient {
    #[instrument(skip(self, bundle), fields(namespace = %self.namespace))]
    async fn create_coordinator(
        &self,
        bundle: DeploymentBundle,
    ) -> Result<(), PlatformClientError> {
        let (deployment, services) = bundle.into_parts();

        let created = self
            .deployments()
            .create(&PostParams::default(), &deployment)
            .await?;
        debug!(name = ?created.metadata.name, "created coordinator deployment");

        for service in services {
            let created = self
                .services()
                .create(&PostParams::default(), &service)
                .await?;
            debug!(name = ?created.metadata.name, "created accompanying service");
        }

        info!(namespace = %self.namespace, "submitted coordinator deployment bundle");
        Ok(())
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn stop_and_cleanup(&self, cluster_id: &str) -> Result<(), PlatformClientError> {
        let delete_params = DeleteParams::default();
        let list_params = ListParams::default().labels(&Self::cluster_selector(cluster_id));

        let _ = self
            .deployments()
            .delete_collection(&delete_params, &list_params)
            .await?;
        let _ = self
            .services()
            .delete_collection(&delete_params, &list_params)
            .await?;

        info!(cluster_id, "deleted cluster resources");
        Ok(())
    }

    async fn rest_endpoint(
        &self,
        cluster_id: &str,
    ) -> Result<Option<Endpoint>, PlatformClientError> {
        let Some(service) = self
            .services()
            .get_opt(&ServiceType::Admin.service_name(cluster_id))
            .await?
        else {
            return Ok(None);
        };

        // only NodePort exposure needs a node address
        let node_address = match service.spec.as_ref().and_then(|spec| spec.type_.as_deref()) {
            Some("NodePort") => self.node_address().await?,
            _ => None,
        };

        endpoint_from_service(&service, node_address.as_deref())
    }

    async fn service(
        &self,
        service_type: ServiceType,
        cluster_id: &str,
    ) -> Result<Option<Service>, PlatformClientError> {
        Ok(self
            .services()
            .get_opt(&service_type.service_name(cluster_id))
            .await?)
    }

    async fn close(&self) -> Result<(), PlatformClientError> {
        // the underlying connection pool is released when the last clone of
        // the client drops; nothing to tear down eagerly
        debug!("closing platform client");
        Ok(())
    }

    fn classify_error(&self, err: &PlatformClientError) {
        match err {
            PlatformClientError::Api(kube::Error::Api(response)) => match response.code {
                404 => warn!(reason = %response.reason, "platform resource not found"),
                409 => warn!(reason = %response.reason, "conflicting platform resource"),
                403 => warn!(reason = %response.reason, "platform request forbidden"),
                code => warn!(code, message = %response.message, "platform api error"),
            },
            other => warn!(error = %other, "platform error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, ServicePort, ServiceSpec, ServiceStatus,
    };

    fn admin_service(type_: &str, port: i32, node_port: Option<i32>) -> Service {
        let mut service = Service::default();
        service.spec = Some(ServiceSpec {
            type_: Some(type_.to_owned()),
            cluster_ip: Some("10.96.0.17".to_owned()),
            ports: Some(vec![ServicePort {
                port,
                node_port,
                ..Default::default()
            }]),
            ..Default::default()
        });
        service
    }

    #[test]
    fn test_cluster_ip_resolution() {
        let service = admin_service("ClusterIP", 8081, None);
        let endpoint = endpoint_from_service(&service, None)
            .expect("resolves")
            .expect("endpoint");
        assert_eq!(endpoint, Endpoint::new("10.96.0.17", 8081));
    }

    #[test]
    fn test_unassigned_cluster_ip_is_not_an_endpoint() {
        let mut service = admin_service("ClusterIP", 8081, None);
        service.spec.as_mut().expect("spec").cluster_ip = Some(String::new());
        assert_eq!(endpoint_from_service(&service, None).expect("resolves"), None);
    }

    #[test]
    fn test_node_port_resolution() {
        let service = admin_service("NodePort", 8081, Some(30081));
        let endpoint = endpoint_from_service(&service, Some("192.168.1.20"))
            .expect("resolves")
            .expect("endpoint");
        assert_eq!(endpoint, Endpoint::new("192.168.1.20", 30081));
    }

    #[test]
    fn test_node_port_without_node_is_an_error() {
        let service = admin_service("NodePort", 8081, Some(30081));
        assert!(matches!(
            endpoint_from_service(&service, None),
            Err(PlatformClientError::NoRoutableNode)
        ));
    }

    #[test]
    fn test_load_balancer_resolution() {
        let mut service = admin_service("LoadBalancer", 8081, None);
        service.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    hostname: Some("lb.example.com".to_owned()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });

        let endpoint = endpoint_from_service(&service, None)
            .expect("resolves")
            .expect("endpoint");
        assert_eq!(endpoint, Endpoint::new("lb.example.com", 8081));
    }

    #[test]
    fn test_pending_load_balancer_is_not_an_endpoint() {
        let service = admin_service("LoadBalancer", 8081, None);
        assert_eq!(endpoint_from_service(&service, None).expect("resolves"), None);
    }

    #[test]
    fn test_service_without_ports_is_malformed() {
        let mut service = admin_service("ClusterIP", 8081, None);
        service.spec.as_mut().expect("spec").ports = None;
        assert!(matches!(
            endpoint_from_service(&service, None),
            Err(PlatformClientError::MalformedResource(_))
        ));
    }
}
