use std::sync::Arc;

use vkube_core::{gvk_string, DynamicObject, GroupVersionKind, NamespacedName};
use vkube_translate::{owner_of, Translator};

use crate::Mapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Computes the host name from `(v_name, v_namespace)`.
pub type NameFn = Arc<dyn Fn(&dyn Translator, &str, &str) -> String + Send + Sync>;

/// Mapper driven by the translator plus a per-type name rule. The reverse
/// direction reads the ownership annotations; it never parses host names.
pub struct GenericMapper {
    gvk: GroupVersionKind,
    translator: Arc<dyn Translator>,
    scope: Scope,
    name_fn: NameFn,
}

impl GenericMapper {
    pub fn new(gvk: GroupVersionKind, translator: Arc<dyn Translator>, scope: Scope, name_fn: NameFn) -> Self {
        Self { gvk, translator, scope, name_fn }
    }

    /// `<name>-x-<namespace>-x-<suffix>` inside the host namespace.
    pub fn namespaced(gvk: GroupVersionKind, translator: Arc<dyn Translator>) -> Self {
        Self::new(gvk, translator, Scope::Namespaced, Arc::new(|t: &dyn Translator, name: &str, ns: &str| t.host_name(name, ns)))
    }

    pub fn cluster(gvk: GroupVersionKind, translator: Arc<dyn Translator>) -> Self {
        Self::new(gvk, translator, Scope::Cluster, Arc::new(|t: &dyn Translator, name: &str, _: &str| t.host_name_cluster(name)))
    }

    pub fn scope(&self) -> Scope { self.scope }
}

impl Mapper for GenericMapper {
    fn group_version_kind(&self) -> GroupVersionKind { self.gvk.clone() }

    fn virtual_to_host(&self, req: &NamespacedName, _v_obj: Option<&DynamicObject>) -> NamespacedName {
        let name = (self.name_fn)(self.translator.as_ref(), &req.name, &req.namespace);
        match self.scope {
            Scope::Namespaced => NamespacedName::new(self.translator.host_namespace(&req.namespace), name),
            Scope::Cluster => NamespacedName::cluster(name),
        }
    }

    fn host_to_virtual(&self, _req: &NamespacedName, p_obj: Option<&DynamicObject>) -> NamespacedName {
        let Some(owner) = p_obj.and_then(owner_of) else {
            return NamespacedName::default();
        };
        if owner.kind.as_deref().is_some_and(|k| k != gvk_string(&self.gvk)) {
            return NamespacedName::default();
        }
        owner.virtual_key()
    }
}
