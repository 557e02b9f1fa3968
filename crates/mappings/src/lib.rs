//! vkube mappings: the GVK -> Mapper registry.
//!
//! The registry is built once by the composition root and handed to every
//! component that resolves identities. Registration happens at startup;
//! afterwards it is read concurrently by reconcile workers.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use tracing::debug;
use vkube_core::{gvk_string, DynamicObject, GroupVersionKind, NamespacedName};

pub mod generic;
pub mod resources;

pub use generic::{GenericMapper, Scope};
pub use resources::{namespaces_mapper, register_default_mappers};

#[derive(Debug, Clone, thiserror::Error)]
pub enum MappingError {
    #[error("couldn't find mapper for GroupVersionKind {0}")]
    NotFound(String),
}

/// Identity translation for one resource type.
pub trait Mapper: Send + Sync {
    fn group_version_kind(&self) -> GroupVersionKind;

    /// Host identity for a virtual object. `v_obj` is `None` when the virtual
    /// object is gone and only its key is known.
    fn virtual_to_host(&self, req: &NamespacedName, v_obj: Option<&DynamicObject>) -> NamespacedName;

    /// Virtual identity of a host object; empty when the host object is not
    /// managed by this instance.
    fn host_to_virtual(&self, req: &NamespacedName, p_obj: Option<&DynamicObject>) -> NamespacedName;
}

#[derive(Default)]
pub struct Registry {
    mappers: Mutex<FxHashMap<GroupVersionKind, Arc<dyn Mapper>>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<GroupVersionKind, Arc<dyn Mapper>>> {
        self.mappers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register under the mapper's GVK. A second registration for the same GVK
    /// replaces the first.
    pub fn add_mapper(&self, mapper: Arc<dyn Mapper>) {
        let gvk = mapper.group_version_kind();
        debug!(gvk = %gvk_string(&gvk), "mapper registered");
        self.lock().insert(gvk, mapper);
    }

    pub fn has(&self, gvk: &GroupVersionKind) -> bool { self.lock().contains_key(gvk) }

    pub fn by_gvk(&self, gvk: &GroupVersionKind) -> Result<Arc<dyn Mapper>, MappingError> {
        self.lock().get(gvk).cloned().ok_or_else(|| MappingError::NotFound(gvk_string(gvk)))
    }

    /// Registered GVKs in a stable order.
    pub fn gvks(&self) -> Vec<GroupVersionKind> {
        let mut out: Vec<_> = self.lock().keys().cloned().collect();
        out.sort_by(|a, b| a.group.cmp(&b.group).then(a.version.cmp(&b.version)).then(a.kind.cmp(&b.kind)));
        out
    }

    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// Resolve the mapper for `gvk` and translate a virtual key. A missing mapper
    /// is a registration defect; callers must not continue syncing that type.
    pub fn virtual_to_host(&self, gvk: &GroupVersionKind, v_name: &str, v_namespace: &str) -> Result<NamespacedName, MappingError> {
        let mapper = self.by_gvk(gvk)?;
        Ok(mapper.virtual_to_host(&NamespacedName::new(v_namespace, v_name), None))
    }

    pub fn virtual_to_host_name(&self, gvk: &GroupVersionKind, v_name: &str, v_namespace: &str) -> Result<String, MappingError> {
        Ok(self.virtual_to_host(gvk, v_name, v_namespace)?.name)
    }

    pub fn host_to_virtual(&self, gvk: &GroupVersionKind, p_obj: &DynamicObject) -> Result<NamespacedName, MappingError> {
        let mapper = self.by_gvk(gvk)?;
        Ok(mapper.host_to_virtual(&NamespacedName::of(p_obj), Some(p_obj)))
    }
}
