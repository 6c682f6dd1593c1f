//! Place all spec types into a single module so they can be used as a lightweight dependency
use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Capability;

/// Primary CRD describing the desired state of one dogu.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "k8s.cloudogu.com",
    version = "v1",
    kind = "Dogu",
    plural = "dogus",
    status = "DoguStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DoguSpec {
    /// Namespaced name of the dogu, e.g. `official/ldap`.
    pub name: String,
    /// Version of the dogu, e.g. `2.4.48-4`.
    pub version: String,
    /// Resources the dogu needs beyond its descriptor.
    #[serde(default)]
    pub resources: DoguResources,
    /// Run the dogu in support mode.
    #[serde(default)]
    pub support_mode: bool,
    /// Options for upgrading this dogu.
    #[serde(default)]
    pub upgrade_config: UpgradeConfig,
    /// Annotations added to the ingress of this dogu.
    #[serde(default)]
    pub additional_ingress_annotations: BTreeMap<String, String>,
    /// Overrides of the security settings declared in the descriptor.
    #[serde(default)]
    pub security: Security,
}

/// Resources requested for a dogu.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DoguResources {
    /// Size of the data volume, e.g. `2Gi`. The operator default is used when unset.
    pub data_volume_size: Option<String>,
}

/// Upgrade options for a dogu.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfig {
    /// Allow an upgrade to move the dogu into a different dogu namespace.
    #[serde(default)]
    pub allow_namespace_switch: bool,
    /// Upgrade even when the installed version is newer or equal.
    #[serde(default)]
    pub force_upgrade: bool,
}

/// Security overrides of a dogu resource.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    /// Capabilities added to or dropped from the descriptor's effective capabilities.
    #[serde(default)]
    pub capabilities: CapabilityOverrides,
    /// Overrides whether the dogu container must run as a non root user.
    pub run_as_non_root: Option<bool>,
    /// Overrides whether the root filesystem of the dogu container is read only.
    pub read_only_root_file_system: Option<bool>,
    /// SELinux context applied to the dogu pod and container.
    pub se_linux_options: Option<SeLinuxOptions>,
    /// Seccomp profile applied to the dogu pod and container.
    pub seccomp_profile: Option<SeccompProfile>,
}

/// Capability edits. `ALL` may be used on either side.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityOverrides {
    /// Capabilities to add.
    #[serde(default)]
    pub add: Vec<Capability>,
    /// Capabilities to drop.
    #[serde(default)]
    pub drop: Vec<Capability>,
}

/// SELinux labels.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeLinuxOptions {
    /// SELinux user label.
    pub user: Option<String>,
    /// SELinux role label.
    pub role: Option<String>,
    /// SELinux type label.
    #[serde(rename = "type")]
    pub type_: Option<String>,
    /// SELinux level label.
    pub level: Option<String>,
}

/// Seccomp profile selection.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeccompProfile {
    /// One of `Localhost`, `RuntimeDefault` or `Unconfined`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Profile path, only for `Localhost`.
    pub localhost_profile: Option<String>,
}

/// Current status of a dogu.
#[derive(Default, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DoguStatus {
    /// Lifecycle state, e.g. `installing` or `installed`.
    #[serde(default)]
    pub status: String,
    /// Time in nanoseconds until the next requeue.
    #[serde(default)]
    pub requeue_time: i64,
    /// Phase the dogu was requeued in.
    #[serde(default)]
    pub requeue_phase: String,
    /// Health of the dogu, `available` or `unavailable`.
    #[serde(default)]
    pub health: String,
    /// Version currently running in the cluster.
    #[serde(default)]
    pub installed_version: String,
    /// Messages recorded while processing the dogu.
    #[serde(default)]
    pub messages: Vec<String>,
}

impl Dogu {
    /// Name of the dogu without its dogu namespace.
    pub fn simple_name(&self) -> String {
        self.name_any()
    }
    /// Name of the secret holding the dogu private key.
    pub fn private_key_secret_name(&self) -> String {
        format!("{}-private", self.name_any())
    }
    /// Name of the data volume in the dogu pod.
    pub fn data_volume_name(&self) -> String {
        format!("{}-data", self.name_any())
    }
    /// Name of the data volume claim.
    pub fn data_pvc_name(&self) -> String {
        self.name_any()
    }
    /// Name of the reserved volume and its claim.
    pub fn reserved_pvc_name(&self) -> String {
        format!("{}-reserved", self.name_any())
    }
    /// Namespace of the resource, `default` when unset.
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_owned())
    }
}
