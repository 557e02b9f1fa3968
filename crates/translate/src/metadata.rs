//! Ownership metadata stamped on every host object the syncer creates.
//!
//! Host naming alone never proves ownership: an unrelated object may already
//! sit at the computed name. These annotations are the only proof.

use std::collections::BTreeMap;

use kube::core::{ObjectMeta, TypeMeta};
use kube::ResourceExt;
use vkube_core::{api_version, gvk_string, DynamicObject, GroupVersionKind, NamespacedName};

use crate::labels::{host_labels_map, RESERVED_PREFIX};
use crate::Translator;

pub const NAME_ANNOTATION: &str = "vcluster.loft.sh/object-name";
pub const NAMESPACE_ANNOTATION: &str = "vcluster.loft.sh/object-namespace";
pub const UID_ANNOTATION: &str = "vcluster.loft.sh/object-uid";
pub const KIND_ANNOTATION: &str = "vcluster.loft.sh/object-kind";
pub const NAMESPACE_LABEL: &str = "vcluster.loft.sh/namespace";
pub const MARKER_LABEL: &str = "vcluster.loft.sh/managed-by";

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Virtual identity recorded on a host object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    pub kind: Option<String>,
}

impl Ownership {
    pub fn virtual_key(&self) -> NamespacedName { NamespacedName::new(self.namespace.clone(), self.name.clone()) }

    /// True when the record names `v_key` and, if a kind was recorded, `gvk`.
    pub fn claims(&self, v_key: &NamespacedName, gvk: &GroupVersionKind) -> bool {
        if self.name != v_key.name || self.namespace != v_key.namespace {
            return false;
        }
        match &self.kind {
            Some(kind) => *kind == gvk_string(gvk),
            None => true,
        }
    }

    /// False only when both sides carry a UID and they differ: the host object
    /// was created for an earlier virtual object with the same name.
    pub fn same_incarnation(&self, v_obj: &DynamicObject) -> bool {
        match (&self.uid, &v_obj.metadata.uid) {
            (Some(recorded), Some(live)) => recorded == live,
            _ => true,
        }
    }
}

/// Read the ownership record of a host object; `None` when it is unmanaged.
pub fn owner_of(host: &DynamicObject) -> Option<Ownership> {
    let annotations = host.metadata.annotations.as_ref()?;
    let name = annotations.get(NAME_ANNOTATION).filter(|n| !n.is_empty())?;
    Some(Ownership {
        name: name.clone(),
        namespace: annotations.get(NAMESPACE_ANNOTATION).cloned().unwrap_or_default(),
        uid: annotations.get(UID_ANNOTATION).cloned(),
        kind: annotations.get(KIND_ANNOTATION).cloned(),
    })
}

/// Virtual annotations minus syncer-reserved keys, plus the ownership record.
pub fn host_annotations(v_obj: &DynamicObject, gvk: &GroupVersionKind) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = v_obj
        .annotations()
        .iter()
        .filter(|(k, _)| !k.starts_with(RESERVED_PREFIX) && k.as_str() != LAST_APPLIED_ANNOTATION)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    out.insert(NAME_ANNOTATION.to_string(), v_obj.name_any());
    out.insert(NAMESPACE_ANNOTATION.to_string(), v_obj.namespace().unwrap_or_default());
    if let Some(uid) = v_obj.uid() {
        out.insert(UID_ANNOTATION.to_string(), uid);
    }
    out.insert(KIND_ANNOTATION.to_string(), gvk_string(gvk));
    out
}

/// Translated virtual labels plus the namespace label (namespaced) or the
/// managed-by marker (cluster-scoped).
pub fn host_labels(t: &dyn Translator, v_obj: &DynamicObject, namespaced: bool) -> BTreeMap<String, String> {
    let mut out = host_labels_map(t, v_obj.labels(), namespaced);
    if namespaced {
        out.insert(NAMESPACE_LABEL.to_string(), v_obj.namespace().unwrap_or_default());
    } else {
        out.insert(MARKER_LABEL.to_string(), t.marker().to_string());
    }
    out
}

/// Fresh host object carrying only translated identity and metadata.
/// Spec/data fields are left to the resource syncer.
pub fn host_metadata(t: &dyn Translator, v_obj: &DynamicObject, gvk: &GroupVersionKind, target: &NamespacedName) -> DynamicObject {
    let namespaced = !target.namespace.is_empty();
    DynamicObject {
        types: Some(TypeMeta { api_version: api_version(gvk), kind: gvk.kind.clone() }),
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: target.namespace_opt().map(str::to_string),
            annotations: Some(host_annotations(v_obj, gvk)),
            labels: Some(host_labels(t, v_obj, namespaced)),
            ..ObjectMeta::default()
        },
        data: serde_json::Value::Object(serde_json::Map::new()),
    }
}
