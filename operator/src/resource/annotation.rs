//! Annotations describing a dogu service to the rest of the ecosystem.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort};
use serde::{Deserialize, Serialize};

use crate::{
    dogu::{ExposedPort, ImageConfig},
    Error, Result,
};

/// Annotation carrying the webapp services a dogu publishes.
pub const CES_SERVICES_ANNOTATION: &str = "k8s-dogu-operator.cloudogu.com/ces-services";
/// Annotation carrying extra annotations for the ingress of a dogu.
pub const ADDITIONAL_INGRESS_ANNOTATIONS: &str =
    "k8s-dogu-operator.cloudogu.com/additional-ingress-annotations";
/// Annotation carrying the exposed ports of a dogu.
pub const CES_EXPOSED_PORTS_ANNOTATION: &str = "k8s-dogu-operator.cloudogu.com/ces-exposed-ports";

const SERVICE_PREFIX: &str = "SERVICE_";
const WEBAPP_TAG: &str = "webapp";

/// A service published through the ingress of the ecosystem.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CesService {
    /// Name of the service.
    pub name: String,
    /// Port the service listens on.
    pub port: i32,
    /// Path the service is reachable under.
    pub location: String,
    /// Path requests are passed to.
    pub pass: String,
    /// Rewrite rule, passed through to the ingress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<String>,
}

/// Entry of an `ADDITIONAL_SERVICES` payload.
#[derive(Deserialize)]
struct AdditionalService {
    name: String,
    port: Option<i32>,
    location: String,
    pass: String,
    rewrite: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExposedPortEntry {
    protocol: String,
    port: i32,
    target_port: i32,
}

fn with_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

/// Environment variables and labels of an image that follow the `SERVICE_*` convention.
/// Labels win over environment variables of the same name.
fn service_vars(image: &ImageConfig) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for entry in &image.env {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| Error::InvalidEnvVar(entry.clone()))?;
        vars.insert(name.to_owned(), value.to_owned());
    }
    vars.extend(image.labels.clone());
    vars.retain(|name, _| name.starts_with(SERVICE_PREFIX));
    Ok(vars)
}

/// Derive the webapp services of a dogu from its image configuration.
///
/// Attributes are looked up per port first (`SERVICE_<port>_<ATTR>`) and then globally
/// (`SERVICE_<ATTR>`). A port is published when its tags contain `webapp`. Any number of
/// further services can be declared as a JSON list in `ADDITIONAL_SERVICES`.
pub fn ces_services(
    service_name: &str,
    ports: &[ServicePort],
    image: &ImageConfig,
) -> Result<Vec<CesService>> {
    let vars = service_vars(image)?;
    let mut services = Vec::new();
    let mut global_additional_done = false;
    for port in ports.iter().map(|port| port.port) {
        let scoped = |attr: &str| vars.get(&format!("{SERVICE_PREFIX}{port}_{attr}"));
        let global = |attr: &str| vars.get(&format!("{SERVICE_PREFIX}{attr}"));
        let lookup = |attr: &str| scoped(attr).or_else(|| global(attr));

        let is_webapp = lookup("TAGS")
            .map(|tags| tags.split(',').any(|tag| tag.trim() == WEBAPP_TAG))
            .unwrap_or(false);
        if is_webapp {
            let name = lookup("NAME").map_or(service_name, String::as_str);
            services.push(CesService {
                name: name.to_owned(),
                port,
                location: with_leading_slash(lookup("LOCATION").map_or(name, String::as_str)),
                pass: with_leading_slash(lookup("PASS").map_or(name, String::as_str)),
                rewrite: lookup("REWRITE").cloned(),
            });
        }

        let additional = match scoped("ADDITIONAL_SERVICES") {
            Some(value) => Some(value),
            None if !global_additional_done => {
                global_additional_done = true;
                global("ADDITIONAL_SERVICES")
            }
            None => None,
        };
        if let Some(value) = additional {
            let parsed: Vec<AdditionalService> =
                serde_json::from_str(value).map_err(|source| Error::InvalidAdditionalServices {
                    value: value.clone(),
                    source,
                })?;
            services.extend(parsed.into_iter().map(|service| CesService {
                name: service.name,
                port: service.port.unwrap_or(port),
                location: with_leading_slash(&service.location),
                pass: with_leading_slash(&service.pass),
                rewrite: service.rewrite,
            }));
        }
    }
    Ok(services)
}

fn annotations_mut(service: &mut Service) -> &mut BTreeMap<String, String> {
    service.metadata.annotations.get_or_insert_with(BTreeMap::new)
}

/// Annotate the service with the webapp services found in the image configuration. The
/// annotation is only set when at least one service is published.
pub fn annotate_ces_services(service: &mut Service, image: &ImageConfig) -> Result<()> {
    let name = service.metadata.name.clone().unwrap_or_default();
    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.clone())
        .unwrap_or_default();
    let services = ces_services(&name, &ports, image)?;
    if !services.is_empty() {
        let value = serde_json::to_string(&services)?;
        annotations_mut(service).insert(CES_SERVICES_ANNOTATION.to_owned(), value);
    }
    Ok(())
}

/// Decode the webapp services from a service annotation.
pub fn parse_ces_services(service: &Service) -> Result<Vec<CesService>> {
    match service
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(CES_SERVICES_ANNOTATION))
    {
        Some(value) => Ok(serde_json::from_str(value)?),
        None => Ok(Vec::new()),
    }
}

/// Replace the additional ingress annotations of the service. An empty map removes the
/// annotation.
pub fn annotate_ingress(
    service: &mut Service,
    annotations: &BTreeMap<String, String>,
) -> Result<()> {
    if annotations.is_empty() {
        if let Some(existing) = service.metadata.annotations.as_mut() {
            existing.remove(ADDITIONAL_INGRESS_ANNOTATIONS);
        }
        return Ok(());
    }
    let value = serde_json::to_string(annotations)?;
    annotations_mut(service).insert(ADDITIONAL_INGRESS_ANNOTATIONS.to_owned(), value);
    Ok(())
}

/// Annotate the service with the exposed ports of the descriptor.
pub fn annotate_exposed_ports(service: &mut Service, ports: &[ExposedPort]) -> Result<()> {
    if ports.is_empty() {
        return Ok(());
    }
    let entries: Vec<ExposedPortEntry> = ports
        .iter()
        .map(|port| ExposedPortEntry {
            protocol: port.protocol(),
            port: port.host,
            target_port: port.container,
        })
        .collect();
    let value = serde_json::to_string(&entries)?;
    annotations_mut(service).insert(CES_EXPOSED_PORTS_ANNOTATION.to_owned(), value);
    Ok(())
}

/// Split an image exposed port such as `8080/tcp` into port and upper case protocol. The
/// protocol defaults to `TCP`.
pub fn split_image_port(value: &str) -> Result<(i32, String)> {
    let (port, protocol) = value.split_once('/').unwrap_or((value, "tcp"));
    let port = port
        .parse::<i32>()
        .map_err(|_| Error::InvalidImagePort(value.to_owned()))?;
    if protocol.is_empty() {
        return Err(Error::InvalidImagePort(value.to_owned()));
    }
    Ok((port, protocol.to_uppercase()))
}
