use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Static definition of a dogu as shipped in its `dogu.json`.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct DoguDescriptor {
    /// Namespaced name, e.g. `official/ldap`.
    pub name: String,
    /// Version, e.g. `2.4.48-4`.
    pub version: String,
    /// Image without tag, e.g. `registry.cloudogu.com/official/ldap`.
    #[serde(default)]
    pub image: String,
    /// Ports reachable from outside the cluster.
    #[serde(default)]
    pub exposed_ports: Vec<ExposedPort>,
    /// Volumes the dogu needs.
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Health checks of the dogu.
    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
    /// Service accounts the dogu requests.
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccount>,
    /// Configuration fields with optional defaults.
    #[serde(default)]
    pub configuration: Vec<ConfigurationField>,
    /// Dependencies on other dogus, components or the client.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Security defaults.
    #[serde(default)]
    pub security: DescriptorSecurity,
}

/// A port exposed to the outside.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ExposedPort {
    /// `tcp` or `udp`.
    #[serde(rename = "Type", default = "default_protocol")]
    pub type_: String,
    /// Port on the host side.
    pub host: i32,
    /// Port inside the container.
    pub container: i32,
}

fn default_protocol() -> String {
    "tcp".to_owned()
}

impl ExposedPort {
    /// Protocol in the upper case form Kubernetes expects.
    pub fn protocol(&self) -> String {
        self.type_.to_uppercase()
    }
}

/// A volume declared by the dogu.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    /// Name, used as sub path in the shared data volume.
    pub name: String,
    /// Mount path inside the container.
    pub path: String,
    /// Numeric user id that must own the volume.
    #[serde(default)]
    pub owner: String,
    /// Numeric group id that must own the volume.
    #[serde(default)]
    pub group: String,
    /// Whether the volume is part of a backup.
    #[serde(default)]
    pub needs_backup: bool,
    /// Parameter blocks telling a named client how to provide the volume.
    #[serde(default)]
    pub clients: Vec<VolumeClient>,
}

impl Volume {
    /// The parameter block addressed to the given client, if any.
    pub fn client(&self, name: &str) -> Option<&VolumeClient> {
        self.clients.iter().find(|client| client.name == name)
    }
    /// Whether an explicit owner and group are declared.
    pub fn needs_ownership(&self) -> bool {
        !self.owner.is_empty() && !self.group.is_empty()
    }
}

/// A volume client parameter block. `params` is decoded by the client it names.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeClient {
    /// Name of the client, e.g. `k8s-dogu-operator`.
    pub name: String,
    /// Client specific payload.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A health check of a dogu.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    /// `tcp` or `state`.
    #[serde(rename = "Type")]
    pub type_: String,
    /// Port for `tcp` checks.
    #[serde(default)]
    pub port: i32,
    /// Expected state for `state` checks, `ready` when empty.
    #[serde(default)]
    pub state: String,
}

/// A service account request.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceAccount {
    /// Service the account is requested from.
    #[serde(rename = "Type")]
    pub type_: String,
    /// Kind of account, `k8s` for Kubernetes service accounts.
    #[serde(default)]
    pub kind: String,
    /// Parameters passed to the account provider.
    #[serde(default)]
    pub params: Vec<String>,
}

/// A configuration field of a dogu.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigurationField {
    /// Key of the field.
    pub name: String,
    /// Description of the field.
    #[serde(default)]
    pub description: String,
    /// Whether the field may be unset.
    #[serde(default)]
    pub optional: bool,
    /// Default value used when the key is unset.
    #[serde(default)]
    pub default: Option<String>,
}

/// A dependency of a dogu.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Dependency {
    /// `dogu`, `component`, `client` or `package`. Defaults to `dogu`.
    #[serde(rename = "Type", default)]
    pub type_: String,
    /// Name of the dependency, simple dogu names for dogus.
    pub name: String,
    /// Version constraint.
    #[serde(default)]
    pub version: String,
}

/// Security defaults of a dogu.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct DescriptorSecurity {
    /// Capability edits applied to the default capabilities.
    #[serde(default)]
    pub capabilities: DescriptorCapabilities,
    /// Whether the container must run as a non root user.
    #[serde(default)]
    pub run_as_non_root: bool,
    /// Whether the root filesystem is read only.
    #[serde(default)]
    pub read_only_root_file_system: bool,
}

/// Capability edits of a descriptor.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct DescriptorCapabilities {
    /// Capabilities to add.
    #[serde(default)]
    pub add: Vec<Capability>,
    /// Capabilities to drop.
    #[serde(default)]
    pub drop: Vec<Capability>,
}

/// Linux capabilities a container may hold. `All` stands for every capability.
#[derive(
    Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum Capability {
    All,
    AuditControl,
    AuditRead,
    AuditWrite,
    BlockSuspend,
    Bpf,
    CheckpointRestore,
    Chown,
    DacOverride,
    DacReadSearch,
    Fowner,
    Fsetid,
    IpcLock,
    IpcOwner,
    Kill,
    Lease,
    LinuxImmutable,
    MacAdmin,
    MacOverride,
    Mknod,
    NetAdmin,
    NetBindService,
    NetBroadcast,
    NetRaw,
    Perfmon,
    Setfcap,
    Setgid,
    Setpcap,
    Setuid,
    SysAdmin,
    SysBoot,
    SysChroot,
    SysModule,
    SysNice,
    SysPacct,
    SysPtrace,
    SysRawio,
    SysResource,
    SysTime,
    SysTtyConfig,
    Syslog,
    WakeAlarm,
}

/// Every capability the platform knows, excluding the `ALL` sentinel.
pub const ALL_CAPABILITIES: [Capability; 41] = [
    Capability::AuditControl,
    Capability::AuditRead,
    Capability::AuditWrite,
    Capability::BlockSuspend,
    Capability::Bpf,
    Capability::CheckpointRestore,
    Capability::Chown,
    Capability::DacOverride,
    Capability::DacReadSearch,
    Capability::Fowner,
    Capability::Fsetid,
    Capability::IpcLock,
    Capability::IpcOwner,
    Capability::Kill,
    Capability::Lease,
    Capability::LinuxImmutable,
    Capability::MacAdmin,
    Capability::MacOverride,
    Capability::Mknod,
    Capability::NetAdmin,
    Capability::NetBindService,
    Capability::NetBroadcast,
    Capability::NetRaw,
    Capability::Perfmon,
    Capability::Setfcap,
    Capability::Setgid,
    Capability::Setpcap,
    Capability::Setuid,
    Capability::SysAdmin,
    Capability::SysBoot,
    Capability::SysChroot,
    Capability::SysModule,
    Capability::SysNice,
    Capability::SysPacct,
    Capability::SysPtrace,
    Capability::SysRawio,
    Capability::SysResource,
    Capability::SysTime,
    Capability::SysTtyConfig,
    Capability::Syslog,
    Capability::WakeAlarm,
];

/// Capabilities a dogu holds when its descriptor does not edit them.
pub const DEFAULT_CAPABILITIES: [Capability; 9] = [
    Capability::Chown,
    Capability::DacOverride,
    Capability::Fowner,
    Capability::Fsetid,
    Capability::Kill,
    Capability::NetBindService,
    Capability::Setgid,
    Capability::Setpcap,
    Capability::Setuid,
];

impl Capability {
    /// Name of the capability as used by Kubernetes, e.g. `NET_BIND_SERVICE`.
    pub fn name(&self) -> String {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(name)) => name,
            _ => format!("{self:?}"),
        }
    }
}

/// Apply capability edits to a set. Drops are applied before adds.
///
/// Dropping `ALL` clears the set, adding `ALL` yields every capability.
pub fn edit_capabilities(
    base: impl IntoIterator<Item = Capability>,
    add: &[Capability],
    drop: &[Capability],
) -> BTreeSet<Capability> {
    let mut capabilities: BTreeSet<Capability> = base.into_iter().collect();
    for capability in drop {
        if *capability == Capability::All {
            capabilities.clear();
            break;
        }
        capabilities.remove(capability);
    }
    for capability in add {
        if *capability == Capability::All {
            return ALL_CAPABILITIES.into_iter().collect();
        }
        capabilities.insert(*capability);
    }
    capabilities
}

impl DoguDescriptor {
    /// Name without the dogu namespace, e.g. `ldap` for `official/ldap`.
    pub fn simple_name(&self) -> &str {
        self.name
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.name)
    }
    /// Image reference including the version tag.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }
    /// Capabilities after applying the descriptor's own edits to the defaults.
    pub fn effective_capabilities(&self) -> BTreeSet<Capability> {
        edit_capabilities(
            DEFAULT_CAPABILITIES,
            &self.security.capabilities.add,
            &self.security.capabilities.drop,
        )
    }
    /// Default value of a configuration field.
    pub fn configuration_default(&self, key: &str) -> Option<&str> {
        self.configuration
            .iter()
            .find(|field| field.name == key)
            .and_then(|field| field.default.as_deref())
    }
    /// Names of dogu dependencies, without dogu namespaces.
    pub fn dogu_dependencies(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|dep| dep.type_.is_empty() || dep.type_ == "dogu")
            .map(|dep| {
                dep.name
                    .split_once('/')
                    .map(|(_, name)| name)
                    .unwrap_or(&dep.name)
                    .to_owned()
            })
            .collect()
    }
    /// Names of component dependencies.
    pub fn component_dependencies(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|dep| dep.type_ == "component")
            .map(|dep| dep.name.clone())
            .collect()
    }
}

/// Container image configuration as stored in the image registry.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    /// Environment variables in `NAME=VALUE` form.
    #[serde(default)]
    pub env: Vec<String>,
    /// Image labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Exposed ports keyed by `<port>/<protocol>`.
    #[serde(default)]
    pub exposed_ports: BTreeMap<String, serde_json::Value>,
}

/// Descriptors of dogus under development, keyed by dogu name.
pub type DevelopmentDoguMap = BTreeMap<String, String>;
