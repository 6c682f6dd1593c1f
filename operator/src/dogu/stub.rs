//! Helper methods only available for tests

use kube::Resource;

use crate::dogu::{
    Dependency, Dogu, DoguDescriptor, DoguSpec, DoguStatus, ExposedPort, HealthCheck, Volume,
    VolumeClient,
};

// Add tests specific implementation to the Dogu
impl Dogu {
    /// A normal test dogu resource for ldap
    pub fn test() -> Self {
        Self::test_named("ldap")
    }
    /// A test dogu resource with the given simple name
    pub fn test_named(name: &str) -> Self {
        let mut dogu = Dogu::new(
            name,
            DoguSpec {
                name: format!("official/{name}"),
                version: "1.2.3".to_owned(),
                ..Default::default()
            },
        );
        let meta = dogu.meta_mut();
        meta.namespace = Some("ecosystem".to_owned());
        meta.uid = Some(format!("{name}-uid"));
        dogu
    }
    /// Modify a dogu to have an expected spec
    pub fn with_spec(self, spec: DoguSpec) -> Self {
        Self { spec, ..self }
    }
    /// Modify a dogu to have an expected status
    pub fn with_status(self, status: DoguStatus) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }
}

impl DoguDescriptor {
    /// A descriptor without volumes, ports or health checks
    pub fn test_minimal(name: &str) -> Self {
        Self {
            name: format!("official/{name}"),
            version: "1.2.3".to_owned(),
            image: format!("registry.cloudogu.com/official/{name}"),
            ..Default::default()
        }
    }
    /// The ldap descriptor used throughout the tests
    pub fn test_ldap() -> Self {
        Self {
            exposed_ports: vec![ExposedPort {
                type_: "tcp".to_owned(),
                host: 2222,
                container: 2222,
            }],
            volumes: vec![
                Volume {
                    name: "db".to_owned(),
                    path: "/var/lib/openldap".to_owned(),
                    owner: "100".to_owned(),
                    group: "101".to_owned(),
                    needs_backup: true,
                    clients: vec![],
                },
                Volume {
                    name: "menu-json".to_owned(),
                    path: "/var/www/html/warp/menu".to_owned(),
                    clients: vec![VolumeClient {
                        name: "k8s-dogu-operator".to_owned(),
                        params: serde_json::json!({
                            "type": "configmap",
                            "content": {"name": "k8s-ces-menu-json"}
                        }),
                    }],
                    ..Default::default()
                },
            ],
            health_checks: vec![
                HealthCheck {
                    type_: "tcp".to_owned(),
                    port: 389,
                    ..Default::default()
                },
                HealthCheck {
                    type_: "state".to_owned(),
                    ..Default::default()
                },
            ],
            dependencies: vec![Dependency {
                type_: "dogu".to_owned(),
                name: "postfix".to_owned(),
                version: ">=3.0.0".to_owned(),
            }],
            ..Self::test_minimal("ldap")
        }
    }
    /// A descriptor exposing the given tcp host ports
    pub fn test_with_ports(name: &str, ports: &[i32]) -> Self {
        Self {
            exposed_ports: ports
                .iter()
                .map(|port| ExposedPort {
                    type_: "tcp".to_owned(),
                    host: *port,
                    container: *port,
                })
                .collect(),
            ..Self::test_minimal(name)
        }
    }
}
