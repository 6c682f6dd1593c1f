//! Utils is shared functions for talking to the cluster

use std::fmt::Debug;

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Service},
    networking::v1::NetworkPolicy,
};
use kube::{
    api::{DeleteParams, PostParams},
    Api, Resource,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::is_not_found;

/// Delete a namespaced object. Succeeds when the object does not exist.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(err) if is_not_found(&err) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Fields the api server refuses to change once an object exists.
pub trait ImmutableFields {
    /// Copy the immutable fields of `self` into the desired state.
    fn keep_immutable(&self, _desired: &mut Self) {}
}

impl ImmutableFields for Deployment {}
impl ImmutableFields for NetworkPolicy {}
// Allocated cluster ips and node ports are kept by the api server itself.
impl ImmutableFields for Service {}

impl ImmutableFields for PersistentVolumeClaim {
    fn keep_immutable(&self, desired: &mut Self) {
        let (Some(existing), Some(spec)) = (self.spec.as_ref(), desired.spec.as_mut()) else {
            return;
        };
        // Set by the binder once the claim is bound.
        spec.volume_name = spec.volume_name.take().or_else(|| existing.volume_name.clone());
        spec.volume_mode = spec.volume_mode.take().or_else(|| existing.volume_mode.clone());
        spec.selector = spec.selector.take().or_else(|| existing.selector.clone());
        spec.data_source = spec.data_source.take().or_else(|| existing.data_source.clone());
        spec.data_source_ref = spec
            .data_source_ref
            .take()
            .or_else(|| existing.data_source_ref.clone());
    }
}

/// Fully replace an existing object with a desired one.
///
/// The resource version and the immutable fields of the existing object are carried over, so
/// a concurrent write makes the api server reject the update with a conflict.
pub async fn replace_existing<K>(
    api: &Api<K>,
    existing: &K,
    mut desired: K,
) -> Result<K, kube::Error>
where
    K: Resource + ImmutableFields + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = existing
        .meta()
        .name
        .clone()
        .or_else(|| desired.meta().name.clone())
        .unwrap_or_default();
    existing.keep_immutable(&mut desired);
    desired.meta_mut().resource_version = existing.meta().resource_version.clone();
    api.replace(&name, &PostParams::default(), &desired).await
}

/// Create an object.
pub async fn create<K>(api: &Api<K>, desired: &K) -> Result<K, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), desired).await
}
