use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy},
        core::v1::{
            PersistentVolumeClaim, PersistentVolumeClaimSpec, PodTemplateSpec,
            ResourceRequirements, Secret, Service, ServicePort, ServiceSpec,
        },
        networking::v1::NetworkPolicy,
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::{core::ObjectMeta, ResourceExt};
use tracing::debug;

use crate::{
    config::GeneratorConfig,
    dogu::{Dogu, DoguDescriptor, ExposedPort, ImageConfig},
    labels::{managed_labels, managed_labels_extend, selector_labels, DOGU_LABEL_VERSION},
    resource::{
        annotation::{
            annotate_ces_services, annotate_exposed_ports, annotate_ingress, split_image_port,
        },
        netpol::network_policies,
        owner::OwnerAttacher,
        pod_template::{chown_init_container, dogu_env, PodTemplateBuilder},
        requirements::{parse_quantity, RequirementsGenerator, ResourceKind},
        security::{container_security_context, pod_security_context},
        volumes::plan_volumes,
    },
    Error, Result,
};

/// Size of the reserved volume claim.
pub const RESERVED_VOLUME_SIZE: &str = "10Mi";

/// Caller supplied modification applied to a generated deployment.
pub type DeploymentPatch<'a> = &'a (dyn Fn(&mut Deployment) + Send + Sync);

/// Generates the cluster objects of a dogu. Every object is owned by the dogu resource.
#[derive(Clone)]
pub struct ResourceGenerator {
    config: GeneratorConfig,
    requirements: RequirementsGenerator,
    owner: Arc<dyn OwnerAttacher>,
}

impl ResourceGenerator {
    /// Create a generator.
    pub fn new(
        config: GeneratorConfig,
        requirements: RequirementsGenerator,
        owner: Arc<dyn OwnerAttacher>,
    ) -> Self {
        Self {
            config,
            requirements,
            owner,
        }
    }

    fn metadata(&self, dogu: &Dogu, name: String) -> Result<ObjectMeta> {
        let mut metadata = ObjectMeta {
            name: Some(name),
            namespace: dogu.namespace(),
            labels: Some(managed_labels(&dogu.simple_name())),
            ..Default::default()
        };
        self.owner.attach(dogu, &mut metadata)?;
        Ok(metadata)
    }

    /// Generate the deployment running the dogu. The optional patch is applied last.
    pub async fn create_dogu_deployment(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
        patch: Option<DeploymentPatch<'_>>,
    ) -> Result<Deployment> {
        let name = dogu.simple_name();
        let resources = self.requirements.generate(descriptor).await?;
        let template = self.pod_template(dogu, descriptor, resources)?;
        let mut deployment = Deployment {
            metadata: self.metadata(dogu, name.clone())?,
            spec: Some(DeploymentSpec {
                selector: LabelSelector {
                    match_labels: Some(selector_labels(&name)),
                    ..Default::default()
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".to_owned()),
                    ..Default::default()
                }),
                template,
                ..Default::default()
            }),
            ..Default::default()
        };
        if let Some(patch) = patch {
            patch(&mut deployment);
        }
        debug!(dogu = %name, "generated deployment");
        Ok(deployment)
    }

    fn pod_template(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
        resources: ResourceRequirements,
    ) -> Result<PodTemplateSpec> {
        let name = dogu.simple_name();
        let labels = managed_labels_extend(
            &name,
            Some(BTreeMap::from([(
                DOGU_LABEL_VERSION.to_owned(),
                descriptor.version.clone(),
            )])),
        );
        let init = chown_init_container(dogu, descriptor, &self.config.chown_init_image)?;
        Ok(PodTemplateBuilder::new(&name, descriptor)
            .labels(labels)
            .host_aliases(self.config.host_aliases.clone())
            .volumes(plan_volumes(dogu, descriptor)?)
            .init_container(init)
            .probes(&descriptor.health_checks)
            .pull_policy(self.config.stage)
            .env(dogu_env())
            .resources(resources)
            .service_account(descriptor)
            .security(
                pod_security_context(dogu, descriptor),
                container_security_context(dogu, descriptor),
            )
            .build())
    }

    /// Generate the cluster internal service of the dogu. Ports are taken from the image
    /// configuration.
    pub fn create_dogu_service(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
        image: &ImageConfig,
    ) -> Result<Service> {
        let name = dogu.simple_name();
        let ports = image
            .exposed_ports
            .keys()
            .map(|key| {
                let (port, protocol) = split_image_port(key)?;
                Ok(ServicePort {
                    name: Some(port.to_string()),
                    port,
                    protocol: Some(protocol),
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut service = Service {
            metadata: self.metadata(dogu, name.clone())?,
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                selector: Some(selector_labels(&name)),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        };
        annotate_ces_services(&mut service, image)?;
        annotate_ingress(&mut service, &dogu.spec.additional_ingress_annotations)?;
        annotate_exposed_ports(&mut service, &descriptor.exposed_ports)?;
        Ok(service)
    }

    /// Generate one load balancer service per exposed port of the dogu.
    pub fn create_dogu_exposed_services(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
    ) -> Result<Vec<Service>> {
        let mut services = Vec::new();
        let mut errors = Vec::new();
        for port in &descriptor.exposed_ports {
            match self.exposed_service(dogu, port) {
                Ok(service) => services.push(service),
                Err(err) => errors.push(err),
            }
        }
        Error::join(errors)?;
        Ok(services)
    }

    fn exposed_service(&self, dogu: &Dogu, port: &ExposedPort) -> Result<Service> {
        let name = dogu.simple_name();
        Ok(Service {
            metadata: self.metadata(dogu, format!("{name}-exposed-{}", port.host))?,
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_owned()),
                selector: Some(selector_labels(&name)),
                ports: Some(vec![ServicePort {
                    name: Some(port.host.to_string()),
                    port: port.host,
                    target_port: Some(IntOrString::Int(port.container)),
                    protocol: Some(port.protocol()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Generate the data volume claim of the dogu. The size requested by the dogu resource
    /// wins over the configured default.
    pub fn create_dogu_pvc(&self, dogu: &Dogu) -> Result<PersistentVolumeClaim> {
        let size = dogu
            .spec
            .resources
            .data_volume_size
            .as_deref()
            .unwrap_or(&self.config.volume_size);
        self.pvc(dogu, dogu.data_pvc_name(), size)
    }

    /// Generate the claim of the reserved volume.
    pub fn create_reserved_pvc(&self, dogu: &Dogu) -> Result<PersistentVolumeClaim> {
        self.pvc(dogu, dogu.reserved_pvc_name(), RESERVED_VOLUME_SIZE)
    }

    fn pvc(&self, dogu: &Dogu, name: String, size: &str) -> Result<PersistentVolumeClaim> {
        let size = parse_quantity(size, ResourceKind::Storage)?;
        Ok(PersistentVolumeClaim {
            metadata: self.metadata(dogu, name)?,
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                storage_class_name: Some(self.config.storage_class.clone()),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_owned(), size)])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Generate an opaque secret of the dogu.
    pub fn create_dogu_secret(
        &self,
        dogu: &Dogu,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<Secret> {
        Ok(Secret {
            metadata: self.metadata(dogu, name.to_owned())?,
            type_: Some("Opaque".to_owned()),
            string_data: Some(data),
            ..Default::default()
        })
    }

    /// Generate the network policies of the dogu.
    pub fn create_network_policies(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
        webapp: bool,
    ) -> Result<Vec<NetworkPolicy>> {
        network_policies(dogu, descriptor, webapp, self.owner.as_ref())
    }

    /// Settings the generator was created with.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Stage,
        dogu::{DoguResources, DoguSpec},
        registry::MockConfigurationStore,
        resource::owner::ControllerOwnerReference,
    };
    use expect_test::expect;
    use k8s_openapi::apimachinery::pkg::{
        api::resource::Quantity, apis::meta::v1::OwnerReference,
    };

    struct FailingOwner;
    impl OwnerAttacher for FailingOwner {
        fn owner_reference(&self, _dogu: &Dogu) -> Result<OwnerReference> {
            Err(Error::OwnerReference("no kind registered for Dogu".to_owned()))
        }
    }

    fn empty_config() -> RequirementsGenerator {
        let mut config = MockConfigurationStore::new();
        config.expect_get().returning(|_, _| Ok(None));
        RequirementsGenerator::new(Arc::new(config))
    }

    fn generator() -> ResourceGenerator {
        ResourceGenerator::new(
            GeneratorConfig::default(),
            empty_config(),
            Arc::new(ControllerOwnerReference),
        )
    }

    #[tokio::test]
    async fn ldap_deployment() {
        let mut descriptor = DoguDescriptor::test_ldap();
        descriptor.security.run_as_non_root = true;
        let deployment = generator()
            .create_dogu_deployment(&Dogu::test(), &descriptor, None)
            .await
            .unwrap();
        assert_eq!(deployment.metadata.name.as_deref(), Some("ldap"));
        assert_eq!(
            deployment.metadata.labels,
            Some(managed_labels("ldap"))
        );
        assert_eq!(deployment.owner_references()[0].uid, "ldap-uid");
        let spec = deployment.spec.unwrap();
        assert_eq!(
            spec.strategy.unwrap().type_.as_deref(),
            Some("Recreate")
        );
        assert_eq!(spec.selector.match_labels, Some(selector_labels("ldap")));
        let labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels.get("dogu.version").map(String::as_str), Some("1.2.3"));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.security_context.unwrap().fs_group, Some(101));
        assert_eq!(
            pod.init_containers.unwrap()[0].image.as_deref(),
            Some("busybox:1.36.1-glibc")
        );
        let container = &pod.containers[0];
        assert_eq!(
            container.image.as_deref(),
            Some("registry.cloudogu.com/official/ldap:1.2.3")
        );
        assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(
            container
                .security_context
                .as_ref()
                .unwrap()
                .run_as_non_root,
            Some(true)
        );
        assert_eq!(container.resources, Some(ResourceRequirements::default()));
    }

    #[tokio::test]
    async fn deployment_patch_is_applied() {
        let generator = ResourceGenerator::new(
            GeneratorConfig {
                stage: Stage::Development,
                ..Default::default()
            },
            empty_config(),
            Arc::new(ControllerOwnerReference),
        );
        let patch: DeploymentPatch = &|deployment: &mut Deployment| {
            if let Some(spec) = deployment.spec.as_mut() {
                spec.replicas = Some(0);
            }
        };
        let deployment = generator
            .create_dogu_deployment(&Dogu::test(), &DoguDescriptor::test_ldap(), Some(patch))
            .await
            .unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(0));
        assert_eq!(
            spec.template.spec.unwrap().containers[0]
                .image_pull_policy
                .as_deref(),
            Some("Always")
        );
    }

    #[test]
    fn ldap_exposed_services() {
        let services = generator()
            .create_dogu_exposed_services(&Dogu::test(), &DoguDescriptor::test_ldap())
            .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].metadata.name.as_deref(), Some("ldap-exposed-2222"));
        let spec = services[0].spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(
            spec.ports,
            Some(vec![ServicePort {
                name: Some("2222".to_owned()),
                port: 2222,
                target_port: Some(IntOrString::Int(2222)),
                protocol: Some("TCP".to_owned()),
                ..Default::default()
            }])
        );
    }

    #[test]
    fn owner_errors_are_collected_per_port() {
        let generator = ResourceGenerator::new(
            GeneratorConfig::default(),
            empty_config(),
            Arc::new(FailingOwner),
        );
        let err = generator
            .create_dogu_exposed_services(
                &Dogu::test(),
                &DoguDescriptor::test_with_ports("ldap", &[2222, 3333]),
            )
            .unwrap_err();
        expect![[r#"
            failed to set controller reference: no kind registered for Dogu
            failed to set controller reference: no kind registered for Dogu"#]]
        .assert_eq(&err.to_string());
    }

    #[test]
    fn service_from_image_config() {
        let image = ImageConfig {
            env: vec!["SERVICE_TAGS=webapp".to_owned()],
            exposed_ports: BTreeMap::from([("8080/tcp".to_owned(), serde_json::json!({}))]),
            ..Default::default()
        };
        let dogu = Dogu::test().with_spec(DoguSpec {
            additional_ingress_annotations: BTreeMap::from([(
                "nginx.ingress.kubernetes.io/proxy-body-size".to_owned(),
                "0".to_owned(),
            )]),
            ..Dogu::test().spec
        });
        let service = generator()
            .create_dogu_service(&dogu, &DoguDescriptor::test_ldap(), &image)
            .unwrap();
        let spec = service.spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(
            spec.ports,
            Some(vec![ServicePort {
                name: Some("8080".to_owned()),
                port: 8080,
                protocol: Some("TCP".to_owned()),
                ..Default::default()
            }])
        );
        let annotations = service.annotations();
        expect![[r#"
            {
                "k8s-dogu-operator.cloudogu.com/additional-ingress-annotations": "{\"nginx.ingress.kubernetes.io/proxy-body-size\":\"0\"}",
                "k8s-dogu-operator.cloudogu.com/ces-exposed-ports": "[{\"protocol\":\"TCP\",\"port\":2222,\"targetPort\":2222}]",
                "k8s-dogu-operator.cloudogu.com/ces-services": "[{\"name\":\"ldap\",\"port\":8080,\"location\":\"/ldap\",\"pass\":\"/ldap\"}]",
            }
        "#]]
        .assert_debug_eq(annotations);
    }

    #[test]
    fn pvc_size_and_class() {
        let pvc = generator().create_dogu_pvc(&Dogu::test()).unwrap();
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("longhorn"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_owned()]));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap()["storage"],
            Quantity("2Gi".to_owned())
        );

        let dogu = Dogu::test().with_spec(DoguSpec {
            resources: DoguResources {
                data_volume_size: Some("5Gi".to_owned()),
            },
            ..Dogu::test().spec
        });
        let pvc = generator().create_dogu_pvc(&dogu).unwrap();
        assert_eq!(
            pvc.spec.unwrap().resources.unwrap().requests.unwrap()["storage"],
            Quantity("5Gi".to_owned())
        );

        let reserved = generator().create_reserved_pvc(&Dogu::test()).unwrap();
        assert_eq!(reserved.metadata.name.as_deref(), Some("ldap-reserved"));
    }

    #[test]
    fn secret_is_opaque() {
        let secret = generator()
            .create_dogu_secret(
                &Dogu::test(),
                "ldap-private",
                BTreeMap::from([("private.pem".to_owned(), "key".to_owned())]),
            )
            .unwrap();
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(secret.metadata.labels, Some(managed_labels("ldap")));
    }
}
