use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, PersistentVolumeClaimVolumeSource, SecretVolumeSource, Volume,
    VolumeMount,
};
use serde::Deserialize;

use crate::{
    dogu::{Dogu, DoguDescriptor, Volume as DoguVolume},
    Error, Result, CONTROLLER_NAME,
};

/// Config map holding the node master file every dogu mounts.
pub const NODE_MASTER_FILE: &str = "node-master-file";
/// Mount path of the reserved volume used by upgrade scripts.
pub const RESERVED_PATH: &str = "/tmp/dogu-reserved";
/// Mount path of the private key secret.
pub const PRIVATE_PATH: &str = "/private";
const NODE_MASTER_PATH: &str = "/etc/ces/node_master";
const NODE_MASTER_SUB_PATH: &str = "node_master";
const PRIVATE_MODE: i32 = 0o744;

/// Envelope of a volume client block addressed to this operator.
#[derive(Deserialize)]
struct RawClientParams {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    content: serde_json::Value,
}

/// Typed volume the operator creates for a volume client block.
#[derive(Debug, PartialEq)]
pub enum ClientVolume {
    /// Mount the named config map.
    ConfigMap(ConfigMapContent),
}

/// Content of a `configmap` client block.
#[derive(Deserialize, Debug, PartialEq)]
pub struct ConfigMapContent {
    /// Name of the config map to mount.
    pub name: String,
}

impl ClientVolume {
    /// Decode the client block of a volume. Unknown types are rejected.
    pub fn decode(volume: &str, params: &serde_json::Value) -> Result<Self> {
        let invalid = |source| Error::InvalidVolumeClientParams {
            volume: volume.to_owned(),
            source,
        };
        let raw = RawClientParams::deserialize(params).map_err(invalid)?;
        match raw.type_.as_str() {
            "configmap" => Ok(ClientVolume::ConfigMap(
                ConfigMapContent::deserialize(&raw.content).map_err(invalid)?,
            )),
            _ => Err(Error::UnsupportedVolumeClient {
                kind: raw.type_,
                volume: volume.to_owned(),
            }),
        }
    }

    fn volume(&self, name: &str) -> Volume {
        match self {
            ClientVolume::ConfigMap(content) => Volume {
                name: name.to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(content.name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }
}

/// Volumes of a dogu pod together with the mounts of its container.
#[derive(Debug, Default, PartialEq)]
pub struct VolumePlan {
    /// Pod volumes.
    pub volumes: Vec<Volume>,
    /// Mounts of the dogu container.
    pub mounts: Vec<VolumeMount>,
}

/// Declared volumes that are backed by the shared data volume claim.
pub fn data_volumes(descriptor: &DoguDescriptor) -> impl Iterator<Item = &DoguVolume> {
    descriptor
        .volumes
        .iter()
        .filter(|volume| volume.client(CONTROLLER_NAME).is_none())
}

/// Plan the volumes and mounts of a dogu.
///
/// Every dogu gets the node master file, its private key secret and the reserved volume.
/// Declared volumes share one data volume claim, each under its own sub path, unless a client
/// block addressed to this operator asks for a different volume type.
pub fn plan_volumes(dogu: &Dogu, descriptor: &DoguDescriptor) -> Result<VolumePlan> {
    let mut plan = static_volumes(dogu);
    let mut client_volumes = Vec::new();
    let mut errors = Vec::new();
    for volume in &descriptor.volumes {
        if let Some(client) = volume.client(CONTROLLER_NAME) {
            match ClientVolume::decode(&volume.name, &client.params) {
                Ok(typed) => client_volumes.push(typed.volume(&volume.name)),
                Err(err) => errors.push(err),
            }
        }
    }
    Error::join(errors)?;

    if data_volumes(descriptor).next().is_some() {
        plan.volumes.push(Volume {
            name: dogu.data_volume_name(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: dogu.data_pvc_name(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    plan.volumes.extend(client_volumes);

    for volume in &descriptor.volumes {
        plan.mounts.push(match volume.client(CONTROLLER_NAME) {
            Some(_) => VolumeMount {
                name: volume.name.clone(),
                mount_path: volume.path.clone(),
                ..Default::default()
            },
            None => data_mount(dogu, volume),
        });
    }
    Ok(plan)
}

/// Mount of a declared volume inside the shared data volume.
pub fn data_mount(dogu: &Dogu, volume: &DoguVolume) -> VolumeMount {
    VolumeMount {
        name: dogu.data_volume_name(),
        mount_path: volume.path.clone(),
        sub_path: Some(volume.name.clone()),
        ..Default::default()
    }
}

fn static_volumes(dogu: &Dogu) -> VolumePlan {
    let private = dogu.private_key_secret_name();
    let reserved = dogu.reserved_pvc_name();
    VolumePlan {
        volumes: vec![
            Volume {
                name: NODE_MASTER_FILE.to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(NODE_MASTER_FILE.to_owned()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: private.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(private.clone()),
                    default_mode: Some(PRIVATE_MODE),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: reserved.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: reserved.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ],
        mounts: vec![
            VolumeMount {
                name: NODE_MASTER_FILE.to_owned(),
                mount_path: NODE_MASTER_PATH.to_owned(),
                sub_path: Some(NODE_MASTER_SUB_PATH.to_owned()),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: private,
                mount_path: PRIVATE_PATH.to_owned(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: reserved,
                mount_path: RESERVED_PATH.to_owned(),
                ..Default::default()
            },
        ],
    }
}
