use async_trait::async_trait;
use vkube_core::{gvk, DynamicObject, GroupVersionKind, NamespacedName};
use vkube_translate::host_metadata;

use super::{same_object, update_host_object, Syncer};
use crate::context::SyncContext;
use crate::error::SyncError;

/// Metadata translation plus a flat copy of selected top-level fields.
pub struct GenericSyncer {
    name: String,
    gvk: GroupVersionKind,
    fields: Vec<&'static str>,
}

impl GenericSyncer {
    pub fn new(name: impl Into<String>, gvk: GroupVersionKind, fields: &[&'static str]) -> Self {
        Self { name: name.into(), gvk, fields: fields.to_vec() }
    }

    pub fn secrets() -> Self { Self::new("secrets", gvk::secrets(), &["type", "data", "stringData", "immutable"]) }

    pub fn config_maps() -> Self { Self::new("configmaps", gvk::config_maps(), &["data", "binaryData", "immutable"]) }

    pub fn storage_classes() -> Self {
        Self::new(
            "storageclasses",
            gvk::storage_classes(),
            &["provisioner", "parameters", "reclaimPolicy", "mountOptions", "allowVolumeExpansion", "volumeBindingMode", "allowedTopologies"],
        )
    }

    pub fn fields(&self) -> &[&'static str] { &self.fields }
}

#[async_trait]
impl Syncer for GenericSyncer {
    fn name(&self) -> &str { &self.name }
    fn gvk(&self) -> GroupVersionKind { self.gvk.clone() }

    fn translate(&self, ctx: &SyncContext, v_obj: &DynamicObject) -> Result<DynamicObject, SyncError> {
        let target = ctx.registry.by_gvk(&self.gvk)?.virtual_to_host(&NamespacedName::of(v_obj), Some(v_obj));
        let mut host = host_metadata(ctx.translator.as_ref(), v_obj, &self.gvk, &target);
        for f in &self.fields {
            if let Some(v) = v_obj.data.get(*f) {
                host.data[*f] = v.clone();
            }
        }
        Ok(host)
    }

    async fn sync(&self, ctx: &SyncContext, p_obj: &DynamicObject, v_obj: &DynamicObject) -> Result<bool, SyncError> {
        let desired = self.translate(ctx, v_obj)?;
        let mut next = p_obj.clone();
        next.metadata.annotations = desired.metadata.annotations;
        next.metadata.labels = desired.metadata.labels;
        for f in &self.fields {
            match desired.data.get(*f) {
                Some(v) => next.data[*f] = v.clone(),
                None => {
                    if let Some(m) = next.data.as_object_mut() {
                        m.remove(*f);
                    }
                }
            }
        }
        if same_object(&next, p_obj)? {
            return Ok(false);
        }
        update_host_object(ctx, &self.gvk, p_obj, next).await?;
        Ok(true)
    }
}
