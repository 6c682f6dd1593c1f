use std::{collections::BTreeMap, sync::Arc, sync::OnceLock};

use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};
use regex::Regex;
use tracing::debug;

use crate::{dogu::DoguDescriptor, registry::ConfigurationStore, Error, Result};

/// Prefix of every resource configuration key in the dogu configuration.
pub const CONTAINER_CONFIG_PREFIX: &str = "container_config";

/// Resource types a dogu container can be limited in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    /// Main memory, configured in ces units.
    Memory,
    /// CPU cores, configured as plain quantities.
    Cpu,
    /// Ephemeral storage, configured in ces units.
    Storage,
}

impl ResourceKind {
    /// Every kind in the order limits are generated in.
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Memory,
        ResourceKind::Cpu,
        ResourceKind::Storage,
    ];

    /// Name of the resource in a container's resource requirements.
    pub fn resource_name(&self) -> &'static str {
        match self {
            ResourceKind::Memory => "memory",
            ResourceKind::Cpu => "cpu",
            ResourceKind::Storage => "ephemeral-storage",
        }
    }

    fn config_name(&self) -> &'static str {
        match self {
            ResourceKind::Memory => "memory",
            ResourceKind::Cpu => "cpu_core",
            ResourceKind::Storage => "storage",
        }
    }

    /// Configuration key of the limit, e.g. `container_config/memory_limit`.
    pub fn limit_key(&self) -> String {
        format!("{CONTAINER_CONFIG_PREFIX}/{}_limit", self.config_name())
    }

    /// Configuration key of the request, e.g. `container_config/memory_request`.
    pub fn request_key(&self) -> String {
        format!("{CONTAINER_CONFIG_PREFIX}/{}_request", self.config_name())
    }
}

fn ces_unit_regex() -> &'static Regex {
    static CES_UNIT: OnceLock<Regex> = OnceLock::new();
    CES_UNIT.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)?)([bkmg])$").expect("ces unit pattern should compile")
    })
}

fn quantity_regex() -> &'static Regex {
    static QUANTITY: OnceLock<Regex> = OnceLock::new();
    QUANTITY.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+|[KMGTPE]i|[numkMGTPE])?$")
            .expect("quantity pattern should compile")
    })
}

/// Parse a value as a resource quantity.
pub fn parse_quantity(value: &str, kind: ResourceKind) -> Result<Quantity> {
    if quantity_regex().is_match(value) {
        Ok(Quantity(value.to_owned()))
    } else {
        Err(unit_error(value, kind))
    }
}

/// Convert a ces unit such as `512m` into a quantity such as `512Mi`.
///
/// Units are `b` (bytes), `k`, `m` and `g` (binary multiples). CPU values are no ces units
/// and are parsed as quantities directly.
pub fn convert_ces_unit(value: &str, kind: ResourceKind) -> Result<Quantity> {
    if kind == ResourceKind::Cpu {
        return parse_quantity(value, kind);
    }
    let captures = ces_unit_regex()
        .captures(value)
        .ok_or_else(|| unit_error(value, kind))?;
    let suffix = match &captures[2] {
        "b" => "",
        "k" => "Ki",
        "m" => "Mi",
        "g" => "Gi",
        _ => return Err(unit_error(value, kind)),
    };
    parse_quantity(&format!("{}{suffix}", &captures[1]), kind).map_err(|_| unit_error(value, kind))
}

fn unit_error(value: &str, kind: ResourceKind) -> Error {
    Error::UnitConversion {
        value: value.to_owned(),
        resource: kind.resource_name().to_owned(),
    }
}

/// Generates container resource requirements from dogu configuration.
#[derive(Clone)]
pub struct RequirementsGenerator {
    config: Arc<dyn ConfigurationStore>,
}

impl RequirementsGenerator {
    /// Create a generator reading from the configuration store.
    pub fn new(config: Arc<dyn ConfigurationStore>) -> Self {
        Self { config }
    }

    /// Generate the requirements of the dogu.
    ///
    /// Every limit and request is read from the dogu configuration and falls back to the
    /// descriptor default of the same key. Values that are set nowhere are left out. All
    /// read and conversion errors are reported together.
    pub async fn generate(&self, descriptor: &DoguDescriptor) -> Result<ResourceRequirements> {
        let mut limits = BTreeMap::new();
        let mut requests = BTreeMap::new();
        let mut errors = Vec::new();
        for kind in ResourceKind::ALL {
            match self.read(descriptor, kind, &kind.limit_key()).await {
                Ok(Some(quantity)) => {
                    limits.insert(kind.resource_name().to_owned(), quantity);
                }
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
            match self.read(descriptor, kind, &kind.request_key()).await {
                Ok(Some(quantity)) => {
                    requests.insert(kind.resource_name().to_owned(), quantity);
                }
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
        }
        Error::join(errors)?;
        Ok(ResourceRequirements {
            limits: (!limits.is_empty()).then_some(limits),
            requests: (!requests.is_empty()).then_some(requests),
            ..Default::default()
        })
    }

    async fn read(
        &self,
        descriptor: &DoguDescriptor,
        kind: ResourceKind,
        key: &str,
    ) -> Result<Option<Quantity>> {
        let dogu = descriptor.simple_name();
        let configured = self
            .config
            .get(dogu, key)
            .await
            .map_err(|source| Error::ConfigRead {
                key: key.to_owned(),
                source,
            })?;
        let value = match configured {
            Some(value) => value,
            None => match descriptor.configuration_default(key) {
                Some(value) => value.to_owned(),
                None => {
                    debug!(%dogu, key, "no resource configuration found");
                    return Ok(None);
                }
            },
        };
        convert_ces_unit(&value, kind).map(Some)
    }
}
