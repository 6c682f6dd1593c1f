use clap::{Args, ValueEnum};
use k8s_openapi::api::core::v1::HostAlias;

/// Deployment stage of the ecosystem the operator runs in.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    /// Images are only pulled when absent.
    #[default]
    Production,
    /// Images are always pulled so that re-tagged development builds are picked up.
    Development,
}

impl Stage {
    /// Image pull policy that matches the stage.
    pub fn image_pull_policy(&self) -> &'static str {
        match self {
            Stage::Production => "IfNotPresent",
            Stage::Development => "Always",
        }
    }
}

/// Operator wide settings, read from flags or the environment.
#[derive(Args, Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace the operator manages dogus in.
    #[arg(long, env = "NAMESPACE", default_value = "ecosystem")]
    pub namespace: String,
    /// Stage of the ecosystem.
    #[arg(long, env = "STAGE", value_enum, default_value_t = Stage::Production)]
    pub stage: Stage,
    /// Image of the init container that fixes volume ownership.
    #[arg(long, env = "CHOWN_INIT_IMAGE", default_value = "busybox:1.36.1-glibc")]
    pub chown_init_image: String,
    /// Storage class every dogu volume claim must use.
    #[arg(long, env = "STORAGE_CLASS", default_value = "longhorn")]
    pub storage_class: String,
    /// Provisioner every dogu volume claim must be bound by.
    #[arg(long, env = "STORAGE_PROVISIONER", default_value = "driver.longhorn.io")]
    pub storage_provisioner: String,
    /// Size of a dogu data volume when the dogu resource does not request one.
    #[arg(long, env = "DOGU_VOLUME_SIZE", default_value = "2Gi")]
    pub volume_size: String,
    /// Name of the config map holding the global configuration.
    #[arg(long, env = "GLOBAL_CONFIG_MAP", default_value = "global-config")]
    pub global_config_map: String,
    /// Global configuration key whose change triggers a resource requirements sync.
    #[arg(
        long,
        env = "REQUIREMENTS_TRIGGER_KEY",
        default_value = "trigger-container-limit-sync"
    )]
    pub requirements_trigger_key: String,
    /// OTLP endpoint traces are exported to. Traces are not exported when unset.
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "ecosystem".to_owned(),
            stage: Stage::Production,
            chown_init_image: "busybox:1.36.1-glibc".to_owned(),
            storage_class: "longhorn".to_owned(),
            storage_provisioner: "driver.longhorn.io".to_owned(),
            volume_size: "2Gi".to_owned(),
            global_config_map: "global-config".to_owned(),
            requirements_trigger_key: "trigger-container-limit-sync".to_owned(),
            otlp_endpoint: None,
        }
    }
}

/// Settings the resource generator needs. Threaded through constructors.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// Stage of the ecosystem, drives the image pull policy.
    pub stage: Stage,
    /// Image of the chown init container.
    pub chown_init_image: String,
    /// Storage class of generated volume claims.
    pub storage_class: String,
    /// Provisioner existing volume claims must be bound by.
    pub storage_provisioner: String,
    /// Default data volume size.
    pub volume_size: String,
    /// Host aliases added to every dogu pod.
    pub host_aliases: Vec<HostAlias>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        (&OperatorConfig::default()).into()
    }
}

impl From<&OperatorConfig> for GeneratorConfig {
    fn from(value: &OperatorConfig) -> Self {
        Self {
            stage: value.stage,
            chown_init_image: value.chown_init_image.clone(),
            storage_class: value.storage_class.clone(),
            storage_provisioner: value.storage_provisioner.clone(),
            volume_size: value.volume_size.clone(),
            host_aliases: Vec::new(),
        }
    }
}
