//! Per-resource sync logic plus the host write helpers every syncer shares.

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info};
use vkube_core::{gvk_key, DynamicObject, GroupVersionKind, NamespacedName};
use vkube_translate::owner_of;

use crate::context::SyncContext;
use crate::error::{ClientError, SyncError};

pub mod export;
pub mod generic;

pub use export::ExportSyncer;
pub use generic::GenericSyncer;

#[async_trait]
pub trait Syncer: Send + Sync {
    fn name(&self) -> &str;
    fn gvk(&self) -> GroupVersionKind;

    /// Desired host object for `v_obj`, identity and metadata included.
    fn translate(&self, ctx: &SyncContext, v_obj: &DynamicObject) -> Result<DynamicObject, SyncError>;

    /// Virtual object without a host counterpart.
    async fn sync_to_host(&self, ctx: &SyncContext, v_obj: &DynamicObject) -> Result<(), SyncError> {
        let desired = self.translate(ctx, v_obj)?;
        create_host_object(ctx, &self.gvk(), v_obj, desired).await.map(|_| ())
    }

    /// Both sides exist and the host object is owned. Returns whether anything was written.
    async fn sync(&self, ctx: &SyncContext, p_obj: &DynamicObject, v_obj: &DynamicObject) -> Result<bool, SyncError>;

    /// Owned host object whose virtual object is gone.
    async fn sync_to_virtual(&self, ctx: &SyncContext, p_obj: &DynamicObject) -> Result<(), SyncError> {
        delete_host_object(ctx, &self.gvk(), p_obj, "virtual object was deleted").await
    }
}

/// Structural equality through the wire representation.
pub(crate) fn same_object(a: &DynamicObject, b: &DynamicObject) -> Result<bool, SyncError> {
    let a = serde_json::to_value(a).map_err(ClientError::from)?;
    let b = serde_json::to_value(b).map_err(ClientError::from)?;
    Ok(a == b)
}

/// Create `desired` on the host. A concurrent create by this key's own
/// earlier reconcile turns into an update; anything else is a conflict.
pub async fn create_host_object(ctx: &SyncContext, gvk: &GroupVersionKind, v_obj: &DynamicObject, desired: DynamicObject) -> Result<DynamicObject, SyncError> {
    let v_key = NamespacedName::of(v_obj);
    let host_key = NamespacedName::of(&desired);
    info!(gvk = %gvk_key(gvk), virtual_key = %v_key, host_key = %host_key, "create host object");
    match ctx.guarded(ctx.host_client.create(gvk, &desired)).await {
        Ok(created) => {
            counter!("sync_host_create_total", 1u64);
            Ok(created)
        }
        Err(SyncError::Client(ClientError::AlreadyExists { .. })) => {
            let live = ctx.get_host(gvk, &host_key).await?;
            match live {
                Some(live) if owner_of(&live).is_some_and(|o| o.claims(&v_key, gvk) && o.same_incarnation(v_obj)) => {
                    debug!(host_key = %host_key, "host object already created for this key; updating");
                    update_host_object(ctx, gvk, &live, desired).await
                }
                Some(_) => Err(SyncError::Conflict { virtual_key: v_key, host_key }),
                None => Err(ClientError::NotFound { kind: gvk.kind.clone(), key: host_key }.into()),
            }
        }
        Err(e) => Err(e),
    }
}

/// Replace `live` with `next`, carrying over the live resourceVersion.
pub async fn update_host_object(ctx: &SyncContext, gvk: &GroupVersionKind, live: &DynamicObject, mut next: DynamicObject) -> Result<DynamicObject, SyncError> {
    next.metadata.resource_version = live.metadata.resource_version.clone();
    let updated = ctx.guarded(ctx.host_client.update(gvk, &next)).await?;
    counter!("sync_host_update_total", 1u64);
    debug!(gvk = %gvk_key(gvk), host_key = %NamespacedName::of(&updated), "host object updated");
    Ok(updated)
}

/// Delete an owned host object. Already gone counts as success.
pub async fn delete_host_object(ctx: &SyncContext, gvk: &GroupVersionKind, p_obj: &DynamicObject, reason: &str) -> Result<(), SyncError> {
    let host_key = NamespacedName::of(p_obj);
    info!(gvk = %gvk_key(gvk), host_key = %host_key, reason, "delete host object");
    match ctx.guarded(ctx.host_client.delete(gvk, &host_key)).await {
        Ok(()) => {
            counter!("sync_host_delete_total", 1u64);
            Ok(())
        }
        Err(SyncError::Client(ClientError::NotFound { .. })) => Ok(()),
        Err(e) => Err(e),
    }
}
