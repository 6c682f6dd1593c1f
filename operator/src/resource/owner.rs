use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{core::ObjectMeta, Resource, ResourceExt};

use crate::{dogu::Dogu, Error, Result};

/// Links generated objects to the dogu resource that owns them.
pub trait OwnerAttacher: Send + Sync {
    /// Controller owner reference pointing at the dogu.
    fn owner_reference(&self, dogu: &Dogu) -> Result<OwnerReference> {
        dogu.controller_owner_ref(&()).ok_or_else(|| {
            Error::OwnerReference(format!("dogu {} has no uid yet", dogu.name_any()))
        })
    }

    /// Make the dogu the controller owner of the object.
    fn attach(&self, dogu: &Dogu, meta: &mut ObjectMeta) -> Result<()> {
        let owner = self.owner_reference(dogu)?;
        let owners = meta.owner_references.get_or_insert_with(Vec::new);
        owners.retain(|existing| existing.uid != owner.uid);
        owners.push(owner);
        Ok(())
    }
}

/// Attaches controller owner references derived from the dogu's own metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerOwnerReference;

impl OwnerAttacher for ControllerOwnerReference {}

/// Reports whether the object is owned by a dogu.
pub fn owned_by_dogu(meta: &ObjectMeta) -> bool {
    let kind = Dogu::kind(&());
    meta.owner_references
        .iter()
        .flatten()
        .any(|owner| owner.kind == kind)
}
