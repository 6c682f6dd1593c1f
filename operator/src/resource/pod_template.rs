use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{
        Container, EnvVar, EnvVarSource, ExecAction, HostAlias, LocalObjectReference,
        ObjectFieldSelector, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
        ResourceRequirements, SecurityContext, TCPSocketAction, Volume, VolumeMount,
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::core::ObjectMeta;

use crate::{
    config::Stage,
    dogu::{Dogu, DoguDescriptor, HealthCheck},
    resource::volumes::{data_mount, data_volumes, VolumePlan},
    Error, Result, CONTROLLER_NAME,
};

/// Secret holding the credentials of every configured container registry.
pub const REGISTRY_SECRET: &str = "ces-container-registries";
/// Name of the init container fixing volume ownership.
pub const CHOWN_INIT_CONTAINER: &str = "dogu-volume-chown-init";

// Probes fail only after 30 minutes so slow starting dogus are not restarted.
const PROBE_TIMEOUT_SECONDS: i32 = 1;
const PROBE_PERIOD_SECONDS: i32 = 10;
const PROBE_FAILURE_THRESHOLD: i32 = 180;

/// Assembles the pod template of a dogu.
///
/// Every setter consumes and returns the builder so templates are composed by chaining.
#[derive(Clone, Debug, Default)]
pub struct PodTemplateBuilder {
    name: String,
    labels: BTreeMap<String, String>,
    host_aliases: Vec<HostAlias>,
    volumes: Vec<Volume>,
    init_containers: Vec<Container>,
    container: Container,
    service_account_name: Option<String>,
    security_context: Option<PodSecurityContext>,
}

impl PodTemplateBuilder {
    /// Start a template for the dogu container running the descriptor's image.
    pub fn new(name: &str, descriptor: &DoguDescriptor) -> Self {
        Self {
            name: name.to_owned(),
            container: Container {
                name: name.to_owned(),
                image: Some(descriptor.image_ref()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Labels of the pod.
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// Host aliases of the pod.
    pub fn host_aliases(mut self, host_aliases: Vec<HostAlias>) -> Self {
        self.host_aliases = host_aliases;
        self
    }

    /// Pod volumes and the matching mounts of the dogu container.
    pub fn volumes(mut self, plan: VolumePlan) -> Self {
        self.volumes = plan.volumes;
        self.container.volume_mounts = Some(plan.mounts);
        self
    }

    /// Add an init container.
    pub fn init_container(mut self, container: Option<Container>) -> Self {
        self.init_containers.extend(container);
        self
    }

    /// Override the command and arguments of the dogu container. Empty values keep the
    /// entrypoint of the image.
    pub fn command(mut self, command: Vec<String>, args: Vec<String>) -> Self {
        self.container.command = (!command.is_empty()).then_some(command);
        self.container.args = (!args.is_empty()).then_some(args);
        self
    }

    /// Liveness and startup probes derived from the descriptor's health checks.
    pub fn probes(mut self, health_checks: &[HealthCheck]) -> Self {
        self.container.liveness_probe = health_checks
            .iter()
            .find(|check| check.type_ == "tcp")
            .map(|check| Probe {
                tcp_socket: Some(TCPSocketAction {
                    port: IntOrString::Int(check.port),
                    ..Default::default()
                }),
                ..tuned_probe()
            });
        self.container.startup_probe = health_checks
            .iter()
            .find(|check| check.type_ == "state")
            .map(|check| {
                let state = if check.state.is_empty() {
                    "ready"
                } else {
                    check.state.as_str()
                };
                Probe {
                    exec: Some(ExecAction {
                        command: Some(vec![
                            "bash".to_owned(),
                            "-c".to_owned(),
                            format!("[[ $(doguctl state) == \"{state}\" ]]"),
                        ]),
                    }),
                    ..tuned_probe()
                }
            });
        self
    }

    /// Image pull policy of the dogu container.
    pub fn pull_policy(mut self, stage: Stage) -> Self {
        self.container.image_pull_policy = Some(stage.image_pull_policy().to_owned());
        self
    }

    /// Environment of the dogu container.
    pub fn env(mut self, env: Vec<EnvVar>) -> Self {
        self.container.env = Some(env);
        self
    }

    /// Resource requirements of the dogu container.
    pub fn resources(mut self, resources: ResourceRequirements) -> Self {
        self.container.resources = Some(resources);
        self
    }

    /// Run the pod under the dogu's own service account when the descriptor asks this operator
    /// for a Kubernetes service account.
    pub fn service_account(mut self, descriptor: &DoguDescriptor) -> Self {
        let requested = descriptor
            .service_accounts
            .iter()
            .any(|account| account.kind == "k8s" && account.type_ == CONTROLLER_NAME);
        self.service_account_name = requested.then(|| self.name.clone());
        self
    }

    /// Security contexts of the pod and the dogu container.
    pub fn security(mut self, pod: PodSecurityContext, container: SecurityContext) -> Self {
        self.security_context = Some(pod);
        self.container.security_context = Some(container);
        self
    }

    /// Build the pod template.
    pub fn build(self) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(self.labels),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                hostname: Some(self.name),
                host_aliases: (!self.host_aliases.is_empty()).then_some(self.host_aliases),
                enable_service_links: Some(false),
                image_pull_secrets: Some(vec![LocalObjectReference {
                    name: Some(REGISTRY_SECRET.to_owned()),
                }]),
                init_containers: (!self.init_containers.is_empty())
                    .then_some(self.init_containers),
                containers: vec![self.container],
                volumes: Some(self.volumes),
                service_account_name: self.service_account_name,
                security_context: self.security_context,
                ..Default::default()
            }),
        }
    }
}

fn tuned_probe() -> Probe {
    Probe {
        timeout_seconds: Some(PROBE_TIMEOUT_SECONDS),
        period_seconds: Some(PROBE_PERIOD_SECONDS),
        failure_threshold: Some(PROBE_FAILURE_THRESHOLD),
        ..Default::default()
    }
}

/// Environment every dogu container gets.
pub fn dogu_env() -> Vec<EnvVar> {
    vec![
        EnvVar {
            name: "ECOSYSTEM_MULTINODE".to_owned(),
            value: Some("true".to_owned()),
            ..Default::default()
        },
        EnvVar {
            name: "POD_NAMESPACE".to_owned(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_owned(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

fn ownership_id(field: &'static str, value: &str, volume: &str) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Error::InvalidVolumeOwnership {
            field,
            value: value.to_owned(),
            volume: volume.to_owned(),
        }),
    }
}

/// Init container that creates the data volume directories and hands them to their owners.
///
/// Returns `None` when no data volume declares an owner.
pub fn chown_init_container(
    dogu: &Dogu,
    descriptor: &DoguDescriptor,
    image: &str,
) -> Result<Option<Container>> {
    let mut commands = Vec::new();
    let mut mounts: Vec<VolumeMount> = Vec::new();
    for volume in data_volumes(descriptor).filter(|volume| volume.needs_ownership()) {
        let owner = ownership_id("owner", &volume.owner, &volume.name)?;
        let group = ownership_id("group", &volume.group, &volume.name)?;
        commands.push(format!(
            "mkdir -p \"{path}\" && chown -R {owner}:{group} \"{path}\"",
            path = volume.path
        ));
        mounts.push(data_mount(dogu, volume));
    }
    if commands.is_empty() {
        return Ok(None);
    }
    Ok(Some(Container {
        name: CHOWN_INIT_CONTAINER.to_owned(),
        image: Some(image.to_owned()),
        command: Some(vec![
            "sh".to_owned(),
            "-c".to_owned(),
            commands.join(" && "),
        ]),
        volume_mounts: Some(mounts),
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dogu::{ServiceAccount, Volume as DoguVolume};
    use expect_test::expect;

    #[test]
    fn chown_covers_owned_data_volumes() {
        let container = chown_init_container(
            &Dogu::test(),
            &DoguDescriptor::test_ldap(),
            "busybox:1.36.1-glibc",
        )
        .unwrap()
        .unwrap();
        assert_eq!(container.name, "dogu-volume-chown-init");
        expect![[r#"
            [
                "sh",
                "-c",
                "mkdir -p \"/var/lib/openldap\" && chown -R 100:101 \"/var/lib/openldap\"",
            ]
        "#]]
        .assert_debug_eq(&container.command.unwrap());
        assert_eq!(
            container.volume_mounts.unwrap()[0].sub_path.as_deref(),
            Some("db")
        );
    }

    #[test]
    fn chown_quotes_paths_with_spaces() {
        let descriptor = DoguDescriptor {
            volumes: vec![DoguVolume {
                name: "home".to_owned(),
                path: "/var/lib/my home".to_owned(),
                owner: "1000".to_owned(),
                group: "1000".to_owned(),
                ..Default::default()
            }],
            ..DoguDescriptor::test_minimal("ldap")
        };
        let container = chown_init_container(&Dogu::test(), &descriptor, "busybox")
            .unwrap()
            .unwrap();
        expect![[r#"
            "mkdir -p \"/var/lib/my home\" && chown -R 1000:1000 \"/var/lib/my home\""
        "#]]
        .assert_debug_eq(&container.command.unwrap()[2]);
    }

    #[test]
    fn chown_skipped_without_owners() {
        let container = chown_init_container(
            &Dogu::test(),
            &DoguDescriptor::test_minimal("ldap"),
            "busybox",
        )
        .unwrap();
        assert_eq!(container, None);
    }

    #[test]
    fn chown_rejects_non_numeric_owner() {
        let descriptor = DoguDescriptor {
            volumes: vec![DoguVolume {
                name: "db".to_owned(),
                path: "/db".to_owned(),
                owner: "ldap".to_owned(),
                group: "101".to_owned(),
                ..Default::default()
            }],
            ..DoguDescriptor::test_minimal("ldap")
        };
        let err = chown_init_container(&Dogu::test(), &descriptor, "busybox").unwrap_err();
        expect!["invalid owner ldap of volume db: must be a positive integer"]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn builds_probes_from_health_checks() {
        let template = PodTemplateBuilder::new("ldap", &DoguDescriptor::test_ldap())
            .probes(&DoguDescriptor::test_ldap().health_checks)
            .build();
        let container = &template.spec.unwrap().containers[0];
        let liveness = container.liveness_probe.as_ref().unwrap();
        assert_eq!(
            liveness.tcp_socket.as_ref().unwrap().port,
            IntOrString::Int(389)
        );
        assert_eq!(liveness.failure_threshold, Some(180));
        let startup = container.startup_probe.as_ref().unwrap();
        assert_eq!(
            startup.exec.as_ref().unwrap().command.as_ref().unwrap()[2],
            "[[ $(doguctl state) == \"ready\" ]]"
        );
        assert_eq!(startup.period_seconds, Some(10));
    }

    #[test]
    fn builds_pod_defaults() {
        let descriptor = DoguDescriptor::test_minimal("ldap");
        let template = PodTemplateBuilder::new("ldap", &descriptor)
            .pull_policy(Stage::Development)
            .env(dogu_env())
            .build();
        let spec = template.spec.unwrap();
        assert_eq!(spec.enable_service_links, Some(false));
        assert_eq!(spec.hostname.as_deref(), Some("ldap"));
        assert_eq!(spec.service_account_name, None);
        assert_eq!(spec.init_containers, None);
        let container = &spec.containers[0];
        assert_eq!(
            container.image.as_deref(),
            Some("registry.cloudogu.com/official/ldap:1.2.3")
        );
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));
        assert_eq!(container.command, None);
        assert_eq!(container.env.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn service_account_needs_operator_client() {
        let mut descriptor = DoguDescriptor::test_minimal("ldap");
        descriptor.service_accounts = vec![ServiceAccount {
            type_: "postgresql".to_owned(),
            ..Default::default()
        }];
        let template = PodTemplateBuilder::new("ldap", &descriptor)
            .service_account(&descriptor)
            .build();
        assert_eq!(template.spec.unwrap().service_account_name, None);

        descriptor.service_accounts.push(ServiceAccount {
            type_: CONTROLLER_NAME.to_owned(),
            kind: "k8s".to_owned(),
            ..Default::default()
        });
        let template = PodTemplateBuilder::new("ldap", &descriptor)
            .service_account(&descriptor)
            .build();
        assert_eq!(
            template.spec.unwrap().service_account_name.as_deref(),
            Some("ldap")
        );
    }
}
