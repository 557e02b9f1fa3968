use std::sync::Arc;

use kube::ResourceExt;
use vkube_core::{DynamicObject, GroupVersionKind};
use vkube_translate::Translator;

use crate::config::CompiledExport;
use crate::error::PatchError;
use crate::resolver::{HostToVirtualResolver, VirtualToHostResolver};
use crate::apply_to_object;

/// Runs one export's patch sets in either direction.
#[derive(Clone)]
pub struct ExportPatcher {
    export: Arc<CompiledExport>,
    translator: Arc<dyn Translator>,
}

impl ExportPatcher {
    pub fn new(export: Arc<CompiledExport>, translator: Arc<dyn Translator>) -> Self { Self { export, translator } }

    pub fn gvk(&self) -> &GroupVersionKind { &self.export.gvk }
    pub fn export(&self) -> &CompiledExport { &self.export }

    /// Build the desired host state into `dest` from `source`. References are
    /// resolved relative to `from_virtual`'s namespace. Reverse-owned fields
    /// are left out; see `keep_host_owned`.
    pub fn server_side_apply(&self, from_virtual: &DynamicObject, dest: &mut DynamicObject, source: &DynamicObject) -> Result<(), PatchError> {
        let namespace = from_virtual.namespace().unwrap_or_default();
        let resolver = VirtualToHostResolver::new(self.translator.as_ref(), namespace);
        apply_to_object(dest, source, &self.export.patches, &self.export.reverse_patches, &resolver)
    }

    /// Copy `status` and every reverse-owned path from the live host object
    /// into `dest`, removing them where `live` has none. A full replace built
    /// from `server_side_apply` output then leaves those fields as the host set them.
    pub fn keep_host_owned(&self, dest: &mut DynamicObject, live: &DynamicObject) -> Result<(), PatchError> {
        let mut dest_json = serde_json::to_value(&*dest)?;
        let live_json = serde_json::to_value(live)?;
        match live_json.get("status") {
            Some(status) => dest_json["status"] = status.clone(),
            None => {
                if let Some(m) = dest_json.as_object_mut() {
                    m.remove("status");
                }
            }
        }
        for p in self.export.reverse_patches.iter().filter(|p| p.ignore != Some(false)) {
            match p.path.first(&live_json) {
                Some(v) => {
                    let v = v.clone();
                    p.path.set(&mut dest_json, &v, false).map_err(|e| PatchError::apply(p.op, p.path.as_str(), e))?;
                }
                None => {
                    p.path.remove(&mut dest_json);
                }
            }
        }
        *dest = serde_json::from_value(dest_json)?;
        Ok(())
    }

    /// Copy host-owned fields from `source` (host) into `dest` (virtual).
    pub fn reverse_update(&self, dest: &mut DynamicObject, source: &DynamicObject) -> Result<(), PatchError> {
        apply_to_object(dest, source, &self.export.reverse_patches, &[], &HostToVirtualResolver)
    }
}
