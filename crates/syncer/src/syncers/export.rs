use async_trait::async_trait;
use metrics::counter;
use tracing::debug;
use vkube_core::{gvk_key, DynamicObject, GroupVersionKind, NamespacedName};
use vkube_patches::{diff_summary, ExportPatcher};
use vkube_translate::host_metadata;

use super::{same_object, update_host_object, Syncer};
use crate::context::SyncContext;
use crate::error::{ClientError, SyncError};

/// Syncs a configured export: forward patches build the host object, reverse
/// patches bring host-owned fields back into the virtual object.
pub struct ExportSyncer {
    name: String,
    patcher: ExportPatcher,
}

impl ExportSyncer {
    pub fn new(patcher: ExportPatcher) -> Self {
        let name = format!("export-{}", gvk_key(patcher.gvk()).to_lowercase());
        Self { name, patcher }
    }

    async fn reverse(&self, ctx: &SyncContext, p_obj: &DynamicObject, v_obj: &DynamicObject) -> Result<bool, SyncError> {
        if self.patcher.export().reverse_patches.is_empty() {
            return Ok(false);
        }
        let gvk = self.gvk();
        let mut next = v_obj.clone();
        self.patcher.reverse_update(&mut next, p_obj)?;
        let status = next.data.get("status").cloned();
        let status_changed = status.as_ref() != v_obj.data.get("status");

        let mut rest_next = next.clone();
        let mut rest_live = v_obj.clone();
        for o in [&mut rest_next, &mut rest_live] {
            if let Some(m) = o.data.as_object_mut() {
                m.remove("status");
            }
        }
        let rest_changed = !same_object(&rest_next, &rest_live)?;

        if rest_changed {
            next = ctx.guarded(ctx.virtual_client.update(&gvk, &next)).await?;
        }
        if status_changed {
            match status {
                Some(st) => next.data["status"] = st,
                None => {
                    if let Some(m) = next.data.as_object_mut() {
                        m.remove("status");
                    }
                }
            }
            ctx.guarded(ctx.virtual_client.update_status(&gvk, &next)).await?;
        }
        if rest_changed || status_changed {
            counter!("sync_virtual_update_total", 1u64);
            debug!(virtual_key = %NamespacedName::of(v_obj), status_changed, rest_changed, "virtual object updated from host");
        }
        Ok(rest_changed || status_changed)
    }
}

#[async_trait]
impl Syncer for ExportSyncer {
    fn name(&self) -> &str { &self.name }
    fn gvk(&self) -> GroupVersionKind { self.patcher.gvk().clone() }

    fn translate(&self, ctx: &SyncContext, v_obj: &DynamicObject) -> Result<DynamicObject, SyncError> {
        let gvk = self.gvk();
        let target = ctx.registry.by_gvk(&gvk)?.virtual_to_host(&NamespacedName::of(v_obj), Some(v_obj));
        let mut host = host_metadata(ctx.translator.as_ref(), v_obj, &gvk, &target);
        self.patcher.server_side_apply(v_obj, &mut host, v_obj)?;
        Ok(host)
    }

    /// Replaces the host object whenever anything the virtual side owns
    /// differs, removals included. Live metadata, `status` and reverse-owned
    /// paths are carried into the replacement unchanged.
    async fn sync(&self, ctx: &SyncContext, p_obj: &DynamicObject, v_obj: &DynamicObject) -> Result<bool, SyncError> {
        let mut next = self.translate(ctx, v_obj)?;
        let labels = next.metadata.labels.take();
        let annotations = next.metadata.annotations.take();
        next.metadata = p_obj.metadata.clone();
        next.metadata.labels = labels;
        next.metadata.annotations = annotations;
        self.patcher.keep_host_owned(&mut next, p_obj)?;

        let next_json = serde_json::to_value(&next).map_err(ClientError::from)?;
        let live_json = serde_json::to_value(p_obj).map_err(ClientError::from)?;
        let diff = diff_summary(&next_json, &live_json);
        let mut wrote = false;
        if !diff.is_empty() {
            debug!(host_key = %NamespacedName::of(p_obj), adds = diff.adds, updates = diff.updates, removes = diff.removes, "host object drifted");
            update_host_object(ctx, &self.gvk(), p_obj, next).await?;
            wrote = true;
        }
        Ok(self.reverse(ctx, p_obj, v_obj).await? || wrote)
    }
}
