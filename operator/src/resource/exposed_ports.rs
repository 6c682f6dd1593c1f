//! One load balancer service shared by every dogu that exposes ports to the outside.
//!
//! Each dogu owns the ports named `<dogu>-<host port>` in the service. Updates replace a dogu's
//! ports without touching the ports of other dogus. Concurrent writers are detected by the
//! resource version check of the api server and surface as conflicts.
use std::sync::Arc;

use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{core::ObjectMeta, Api, Client};
use tracing::{debug, info};

use crate::{
    dogu::DoguDescriptor,
    labels::{ces_labels, selector_labels},
    registry::TcpUdpExposer,
    resource::netpol::INGRESS_CONTROLLER,
    utils::{create, delete_if_exists, replace_existing},
    Result,
};

/// Name of the shared load balancer service.
pub const LOADBALANCER_NAME: &str = "ces-loadbalancer";

/// Reports whether a port of the shared service belongs to the dogu.
pub fn is_dogu_port(port_name: &str, dogu: &str) -> bool {
    port_name
        .strip_prefix(dogu)
        .and_then(|rest| rest.strip_prefix('-'))
        .map(|host| !host.is_empty() && host.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Ports of the shared service for the exposed ports of the dogu.
pub fn dogu_ports(descriptor: &DoguDescriptor) -> Vec<ServicePort> {
    let dogu = descriptor.simple_name();
    descriptor
        .exposed_ports
        .iter()
        .map(|port| ServicePort {
            name: Some(format!("{dogu}-{}", port.host)),
            port: port.host,
            target_port: Some(IntOrString::Int(port.host)),
            protocol: Some(port.protocol()),
            ..Default::default()
        })
        .collect()
}

fn without_dogu_ports(ports: Vec<ServicePort>, dogu: &str) -> Vec<ServicePort> {
    ports
        .into_iter()
        .filter(|port| !is_dogu_port(port.name.as_deref().unwrap_or_default(), dogu))
        .collect()
}

fn ports_of(service: &Service) -> Vec<ServicePort> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.clone())
        .unwrap_or_default()
}

fn loadbalancer(namespace: &str, ports: Vec<ServicePort>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(LOADBALANCER_NAME.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(ces_labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_owned()),
            ip_family_policy: Some("SingleStack".to_owned()),
            ip_families: Some(vec!["IPv4".to_owned()]),
            selector: Some(selector_labels(INGRESS_CONTROLLER)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Maintains the exposed ports of dogus in the shared load balancer service.
pub struct DoguExposedPortHandler {
    services: Api<Service>,
    namespace: String,
    exposer: Arc<dyn TcpUdpExposer>,
}

impl DoguExposedPortHandler {
    /// Create a handler for the namespace.
    pub fn new(client: Client, namespace: &str, exposer: Arc<dyn TcpUdpExposer>) -> Self {
        Self {
            services: Api::namespaced(client, namespace),
            namespace: namespace.to_owned(),
            exposer,
        }
    }

    /// Add or refresh the ports of the dogu in the shared service and register them with the
    /// exposer. Does nothing when the dogu exposes no ports.
    pub async fn create_or_update_ces_loadbalancer_service(
        &self,
        descriptor: &DoguDescriptor,
    ) -> Result<Service> {
        if descriptor.exposed_ports.is_empty() {
            return Ok(Service::default());
        }
        let dogu = descriptor.simple_name();
        let service = match self.services.get_opt(LOADBALANCER_NAME).await? {
            None => {
                info!(%dogu, "creating shared load balancer service");
                create(
                    &self.services,
                    &loadbalancer(&self.namespace, dogu_ports(descriptor)),
                )
                .await?
            }
            Some(existing) => {
                let mut ports = without_dogu_ports(ports_of(&existing), dogu);
                ports.extend(dogu_ports(descriptor));
                let mut updated = existing.clone();
                updated.spec.get_or_insert_with(Default::default).ports = Some(ports);
                debug!(%dogu, "updating ports of shared load balancer service");
                replace_existing(&self.services, &existing, updated).await?
            }
        };
        self.exposer
            .expose_or_update_dogu_services(&self.namespace, descriptor)
            .await?;
        Ok(service)
    }

    /// Remove the ports of the dogu from the exposer and the shared service. The service is
    /// deleted once it has no ports left.
    pub async fn remove_exposed_ports(&self, descriptor: &DoguDescriptor) -> Result<()> {
        self.exposer
            .delete_dogu_services(&self.namespace, descriptor)
            .await?;
        let Some(existing) = self.services.get_opt(LOADBALANCER_NAME).await? else {
            return Ok(());
        };
        let dogu = descriptor.simple_name();
        let ports = without_dogu_ports(ports_of(&existing), dogu);
        if ports.is_empty() {
            info!(%dogu, "deleting shared load balancer service without ports");
            delete_if_exists(&self.services, LOADBALANCER_NAME).await?;
        } else {
            let mut updated = existing.clone();
            updated.spec.get_or_insert_with(Default::default).ports = Some(ports);
            replace_existing(&self.services, &existing, updated).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::MockTcpUdpExposer,
        utils::test::{mock_client, timeout_after_1s},
        Error,
    };

    const PATH: &str = "/api/v1/namespaces/ecosystem/services/ces-loadbalancer";

    fn exposer(exposes: usize, deletes: usize) -> Arc<MockTcpUdpExposer> {
        let mut exposer = MockTcpUdpExposer::new();
        exposer
            .expect_expose_or_update_dogu_services()
            .times(exposes)
            .returning(|namespace, _| {
                assert_eq!(namespace, "ecosystem");
                Ok(())
            });
        exposer
            .expect_delete_dogu_services()
            .times(deletes)
            .returning(|_, _| Ok(()));
        Arc::new(exposer)
    }

    fn handler(client: Client, exposer: Arc<MockTcpUdpExposer>) -> DoguExposedPortHandler {
        DoguExposedPortHandler::new(client, "ecosystem", exposer)
    }

    fn port_names(value: &serde_json::Value) -> Vec<String> {
        value["spec"]["ports"]
            .as_array()
            .expect("ports should be a list")
            .iter()
            .map(|port| port["name"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    fn shared_service(ports: &[(&str, i32)]) -> Service {
        let ports = ports
            .iter()
            .map(|(name, port)| ServicePort {
                name: Some(name.to_string()),
                port: *port,
                target_port: Some(IntOrString::Int(*port)),
                protocol: Some("TCP".to_owned()),
                ..Default::default()
            })
            .collect();
        let mut service = loadbalancer("ecosystem", ports);
        service.metadata.resource_version = Some("7".to_owned());
        service
    }

    #[test]
    fn matches_only_prefixed_numeric_ports() {
        assert!(is_dogu_port("nginx-80", "nginx"));
        assert!(!is_dogu_port("nginx-ingress-80", "nginx"));
        assert!(!is_dogu_port("scm-2222", "nginx"));
        assert!(!is_dogu_port("nginx-", "nginx"));
        assert!(!is_dogu_port("nginx80", "nginx"));
    }

    #[tokio::test]
    async fn no_exposed_ports_is_a_noop() {
        let (client, _server) = mock_client();
        let service = handler(client, exposer(0, 0))
            .create_or_update_ces_loadbalancer_service(&DoguDescriptor::test_minimal("cas"))
            .await
            .unwrap();
        assert_eq!(service, Service::default());
    }

    #[tokio::test]
    async fn creates_shared_service() {
        let (client, mut server) = mock_client();
        let mocksrv = tokio::spawn(async move {
            server.respond_not_found().await.assert("GET", PATH);
            let created = server.respond_echo().await;
            created.assert("POST", "/api/v1/namespaces/ecosystem/services");
            assert_eq!(
                created.body["spec"],
                serde_json::json!({
                    "type": "LoadBalancer",
                    "ipFamilyPolicy": "SingleStack",
                    "ipFamilies": ["IPv4"],
                    "selector": {"dogu.name": "nginx-ingress"},
                    "ports": [
                        {"name": "ldap-2222", "port": 2222, "targetPort": 2222, "protocol": "TCP"}
                    ]
                })
            );
        });
        handler(client, exposer(1, 0))
            .create_or_update_ces_loadbalancer_service(&DoguDescriptor::test_ldap())
            .await
            .unwrap();
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn merges_removes_and_deletes_port_slices() {
        let (client, mut server) = mock_client();
        let mocksrv = tokio::spawn(async move {
            server.respond_with(&shared_service(&[("scm-2222", 2222)])).await;
            let merged = server.respond_echo().await;
            merged.assert("PUT", PATH);
            assert_eq!(merged.body["metadata"]["resourceVersion"], "7");
            assert_eq!(
                port_names(&merged.body),
                vec!["scm-2222", "nginx-80", "nginx-443"]
            );

            server.respond_with(&merged.body).await;
            let removed = server.respond_echo().await;
            removed.assert("PUT", PATH);
            assert_eq!(port_names(&removed.body), vec!["nginx-80", "nginx-443"]);

            server.respond_with(&removed.body).await;
            server
                .respond_with(&removed.body)
                .await
                .assert("DELETE", PATH);
        });
        let nginx = DoguDescriptor::test_with_ports("nginx", &[80, 443]);
        let scm = DoguDescriptor::test_with_ports("scm", &[2222]);
        let handler = handler(client, exposer(1, 2));
        handler
            .create_or_update_ces_loadbalancer_service(&nginx)
            .await
            .unwrap();
        handler.remove_exposed_ports(&scm).await.unwrap();
        handler.remove_exposed_ports(&nginx).await.unwrap();
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn removing_from_missing_service_succeeds() {
        let (client, mut server) = mock_client();
        let mocksrv = tokio::spawn(async move {
            server.respond_not_found().await.assert("GET", PATH);
        });
        handler(client, exposer(0, 1))
            .remove_exposed_ports(&DoguDescriptor::test_ldap())
            .await
            .unwrap();
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn conflicting_update_surfaces() {
        let (client, mut server) = mock_client();
        let mocksrv = tokio::spawn(async move {
            server.respond_with(&shared_service(&[("scm-2222", 2222)])).await;
            server.respond_conflict().await.assert("PUT", PATH);
        });
        let err = handler(client, exposer(0, 0))
            .create_or_update_ces_loadbalancer_service(&DoguDescriptor::test_ldap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Kube { .. }));
        timeout_after_1s(mocksrv).await;
    }
}
