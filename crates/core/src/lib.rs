//! vkube core identity types: namespaced names and GroupVersionKind helpers.

#![forbid(unsafe_code)]

use std::fmt;

use kube::ResourceExt;
use serde::{Deserialize, Serialize};

pub use kube::core::{DynamicObject, GroupVersionKind};

pub mod gvk;

/// `(name, namespace)` pair addressing one object inside one cluster.
///
/// Cluster-scoped objects carry an empty namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: String::new(), name: name.into() }
    }

    /// Identity of a live object as read from its metadata.
    pub fn of(obj: &DynamicObject) -> Self {
        Self { namespace: obj.namespace().unwrap_or_default(), name: obj.name_any() }
    }

    /// An empty name means "no counterpart" (e.g. an unmanaged host object).
    pub fn is_empty(&self) -> bool { self.name.is_empty() }

    pub fn namespace_opt(&self) -> Option<&str> {
        if self.namespace.is_empty() { None } else { Some(self.namespace.as_str()) }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid gvk key: {0} (expect v1/Kind or group/v1/Kind)")]
pub struct InvalidGvkKey(pub String);

/// Render a GVK the way the apimachinery does: `group/version, Kind=Kind`.
/// The core group renders as `/v1, Kind=Secret`.
pub fn gvk_string(gvk: &GroupVersionKind) -> String {
    format!("{}/{}, Kind={}", gvk.group, gvk.version, gvk.kind)
}

/// Short key form used on the command line and in config: `v1/Secret` or `group/v1/Kind`.
pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind, InvalidGvkKey> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk(group, version, kind)),
        _ => Err(InvalidGvkKey(key.to_string())),
    }
}

/// Split an `apiVersion` string into `(group, version)`.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    }
}

pub fn api_version(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() { gvk.version.clone() } else { format!("{}/{}", gvk.group, gvk.version) }
}

pub mod prelude {
    pub use super::{gvk_key, gvk_string, DynamicObject, GroupVersionKind, NamespacedName};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_empty_namespace() {
        assert_eq!(NamespacedName::new("default", "a").to_string(), "default/a");
        assert_eq!(NamespacedName::cluster("standard").to_string(), "standard");
        assert!(NamespacedName::default().is_empty());
    }

    #[test]
    fn gvk_string_matches_apimachinery_format() {
        assert_eq!(gvk_string(&gvk::secrets()), "/v1, Kind=Secret");
        assert_eq!(gvk_string(&gvk::storage_classes()), "storage.k8s.io/v1, Kind=StorageClass");
    }

    #[test]
    fn gvk_keys_parse_both_forms() {
        let core = parse_gvk_key("v1/ConfigMap").unwrap();
        assert_eq!(core, gvk::config_maps());
        let sc = parse_gvk_key("storage.k8s.io/v1/StorageClass").unwrap();
        assert_eq!(gvk_key(&sc), "storage.k8s.io/v1/StorageClass");
        assert!(parse_gvk_key("Secret").is_err());
        assert!(parse_gvk_key("a/b/c/d").is_err());
    }

    #[test]
    fn api_version_round_trips() {
        assert_eq!(api_version(&gvk::secrets()), "v1");
        assert_eq!(split_api_version("networking.k8s.io/v1"), ("networking.k8s.io", "v1"));
        assert_eq!(split_api_version("v1"), ("", "v1"));
    }

    #[test]
    fn namespaced_name_of_object() {
        let mut obj = DynamicObject::new("a", &kube::core::ApiResource::from_gvk(&gvk::secrets()));
        obj.metadata.namespace = Some("default".into());
        assert_eq!(NamespacedName::of(&obj), NamespacedName::new("default", "a"));
    }
}
