use std::{collections::BTreeSet, fmt::Debug, sync::Arc};

use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{PersistentVolumeClaim, Service},
        networking::v1::NetworkPolicy,
    },
    NamespaceResourceScope,
};
use kube::{api::ListParams, Api, Client, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::{
    dogu::{Dogu, DoguDescriptor, ImageConfig},
    labels::{selector_labels, to_selector, DOGU_LABEL_NAME},
    registry::ImageRegistry,
    resource::{
        annotation::parse_ces_services,
        generator::{DeploymentPatch, ResourceGenerator},
        owner::owned_by_dogu,
        volumes::data_volumes,
    },
    utils::{create, delete_if_exists, replace_existing, ImmutableFields},
    Error, Result,
};

/// Annotation the storage provisioner records on claims it binds.
pub const STORAGE_PROVISIONER_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-provisioner";

/// Check run against an existing object before it is overwritten.
pub type Validator<'a, K> = &'a (dyn Fn(&K) -> Result<()> + Send + Sync);

/// Create the object, or fully replace it when it exists.
///
/// When the existing object is owned by a dogu the validator runs against it first, and a
/// rejection leaves the object untouched. Objects without a dogu owner are replaced without
/// validation. Conflicts are not retried.
pub async fn update_or_insert<K>(
    api: &Api<K>,
    desired: K,
    validator: Option<Validator<'_, K>>,
) -> Result<K>
where
    K: Resource + ImmutableFields + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = desired.name_any();
    match api.get_opt(&name).await? {
        None => {
            debug!(%name, "creating object");
            Ok(create(api, &desired).await?)
        }
        Some(existing) => {
            if let Some(validator) = validator.filter(|_| owned_by_dogu(existing.meta())) {
                validator(&existing)?;
            }
            debug!(%name, "replacing object");
            Ok(replace_existing(api, &existing, desired).await?)
        }
    }
}

/// Rejects volume claims that are not bound by the expected provisioner, do not belong to the
/// dogu or use another storage class.
pub fn pvc_validator(
    dogu: &str,
    storage_class: &str,
    provisioner: &str,
) -> impl Fn(&PersistentVolumeClaim) -> Result<()> + Send + Sync {
    let dogu = dogu.to_owned();
    let storage_class = storage_class.to_owned();
    let provisioner = provisioner.to_owned();
    move |pvc: &PersistentVolumeClaim| {
        let name = pvc.name_any();
        let bound_by = pvc.annotations().get(STORAGE_PROVISIONER_ANNOTATION);
        if bound_by != Some(&provisioner) {
            return Err(Error::ValidationRejected(format!(
                "pvc {name} is not provisioned by {provisioner}"
            )));
        }
        if pvc.labels().get(DOGU_LABEL_NAME) != Some(&dogu) {
            return Err(Error::ValidationRejected(format!(
                "pvc {name} does not carry label {DOGU_LABEL_NAME}={dogu}"
            )));
        }
        let class = pvc
            .spec
            .as_ref()
            .and_then(|spec| spec.storage_class_name.as_deref());
        if class != Some(storage_class.as_str()) {
            return Err(Error::ValidationRejected(format!(
                "pvc {name} does not use storage class {storage_class}"
            )));
        }
        Ok(())
    }
}

/// Applies the generated objects of a dogu to the cluster.
pub struct Upserter {
    client: Client,
    generator: ResourceGenerator,
    image_registry: Arc<dyn ImageRegistry>,
}

impl Upserter {
    /// Create an upserter.
    pub fn new(
        client: Client,
        generator: ResourceGenerator,
        image_registry: Arc<dyn ImageRegistry>,
    ) -> Self {
        Self {
            client,
            generator,
            image_registry,
        }
    }

    fn api<K>(&self, dogu: &Dogu) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &dogu.namespace_or_default())
    }

    /// Generate and apply the deployment of the dogu.
    pub async fn upsert_dogu_deployment(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
        patch: Option<DeploymentPatch<'_>>,
    ) -> Result<Deployment> {
        let deployment = self
            .generator
            .create_dogu_deployment(dogu, descriptor, patch)
            .await?;
        update_or_insert(&self.api(dogu), deployment, None).await
    }

    /// Generate and apply the service of the dogu.
    pub async fn upsert_dogu_service(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
        image: &ImageConfig,
    ) -> Result<Service> {
        let service = self.generator.create_dogu_service(dogu, descriptor, image)?;
        update_or_insert(&self.api(dogu), service, None).await
    }

    /// Generate and apply the exposed services of the dogu. Every service is applied even when
    /// others fail.
    pub async fn upsert_dogu_exposed_services(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
    ) -> Result<Vec<Service>> {
        let api = self.api(dogu);
        let mut applied = Vec::new();
        let mut errors = Vec::new();
        for service in self.generator.create_dogu_exposed_services(dogu, descriptor)? {
            match update_or_insert(&api, service, None).await {
                Ok(service) => applied.push(service),
                Err(err) => errors.push(err),
            }
        }
        Error::join(errors)?;
        Ok(applied)
    }

    /// Generate and apply the volume claims of the dogu. The data claim only exists when the
    /// dogu declares data volumes.
    pub async fn upsert_dogu_pvcs(&self, dogu: &Dogu, descriptor: &DoguDescriptor) -> Result<()> {
        let api = self.api(dogu);
        let config = self.generator.config();
        let validator: Validator<PersistentVolumeClaim> = &pvc_validator(
            &dogu.simple_name(),
            &config.storage_class,
            &config.storage_provisioner,
        );
        let reserved = self.generator.create_reserved_pvc(dogu)?;
        update_or_insert(&api, reserved, Some(validator)).await?;
        if data_volumes(descriptor).next().is_some() {
            let data = self.generator.create_dogu_pvc(dogu)?;
            update_or_insert(&api, data, Some(validator)).await?;
        }
        Ok(())
    }

    /// Apply the network policies of the dogu and delete the ones no longer generated.
    ///
    /// The ingress policy is only generated when the service publishes a webapp.
    pub async fn upsert_dogu_network_policies(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
        service: &Service,
    ) -> Result<()> {
        let api: Api<NetworkPolicy> = self.api(dogu);
        let webapp = !parse_ces_services(service)?.is_empty();
        let policies = self
            .generator
            .create_network_policies(dogu, descriptor, webapp)?;
        let wanted: BTreeSet<String> = policies.iter().map(|policy| policy.name_any()).collect();
        for policy in policies {
            update_or_insert(&api, policy, None).await?;
        }
        let selector = to_selector(&selector_labels(&dogu.simple_name()));
        let existing = api.list(&ListParams::default().labels(&selector)).await?;
        for policy in existing {
            let name = policy.name_any();
            if !wanted.contains(&name) {
                info!(dogu = %dogu.simple_name(), policy = %name, "deleting stale network policy");
                delete_if_exists(&api, &name).await?;
            }
        }
        Ok(())
    }

    /// Apply deployment, service, exposed services and volume claims of the dogu, stopping at
    /// the first failure.
    pub async fn upsert_dogu(
        &self,
        dogu: &Dogu,
        descriptor: &DoguDescriptor,
        patch: Option<DeploymentPatch<'_>>,
    ) -> Result<()> {
        let image = self
            .image_registry
            .pull_image_config(&descriptor.image_ref())
            .await?;
        self.upsert_dogu_deployment(dogu, descriptor, patch).await?;
        self.upsert_dogu_service(dogu, descriptor, &image).await?;
        self.upsert_dogu_exposed_services(dogu, descriptor).await?;
        self.upsert_dogu_pvcs(dogu, descriptor).await?;
        info!(dogu = %dogu.simple_name(), "upserted dogu resources");
        Ok(())
    }
}
