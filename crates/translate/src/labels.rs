//! Label key and selector translation.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::metadata::{MARKER_LABEL, NAMESPACE_LABEL};
use crate::{safe_concat_name, short_digest, Translator};

/// Keys under this prefix belong to the syncer and are never passed through verbatim.
pub const RESERVED_PREFIX: &str = "vcluster.loft.sh/";
pub const LABEL_PREFIX: &str = "vcluster.loft.sh/label";

pub fn is_reserved(key: &str) -> bool { key.starts_with(RESERVED_PREFIX) }

/// `vcluster.loft.sh/label-<instance>-x-<digest(key)>`
pub fn convert_label_key(instance: &str, key: &str) -> String {
    let prefix = format!("{}-{}", LABEL_PREFIX, instance);
    safe_concat_name(&[&prefix, "x", &short_digest(key)])
}

/// Translate a plain label map for a host object.
pub fn host_labels_map(t: &dyn Translator, labels: &BTreeMap<String, String>, namespaced: bool) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| {
            let key = if namespaced { t.host_label(k) } else { t.host_label_cluster(k) };
            (key, v.clone())
        })
        .collect()
}

fn translate_selector(selector: &LabelSelector, key_fn: impl Fn(&str) -> String) -> LabelSelector {
    let match_labels = selector
        .match_labels
        .as_ref()
        .map(|m| m.iter().map(|(k, v)| (key_fn(k), v.clone())).collect::<BTreeMap<_, _>>());
    let match_expressions = selector.match_expressions.as_ref().map(|exprs| {
        exprs
            .iter()
            .map(|e| {
                let mut e = e.clone();
                e.key = key_fn(&e.key);
                e
            })
            .collect()
    });
    LabelSelector { match_labels, match_expressions }
}

/// Selector over namespaced host objects. When `namespace` is given the
/// selector is pinned to objects synced from that virtual namespace.
pub fn host_label_selector(t: &dyn Translator, selector: &LabelSelector, namespace: Option<&str>) -> LabelSelector {
    let mut out = translate_selector(selector, |k| t.host_label(k));
    if let Some(ns) = namespace {
        out.match_labels.get_or_insert_with(BTreeMap::new).insert(NAMESPACE_LABEL.to_string(), ns.to_string());
    }
    out
}

/// Selector over cluster-scoped host objects owned by this instance.
pub fn host_label_selector_cluster(t: &dyn Translator, selector: &LabelSelector) -> LabelSelector {
    let mut out = translate_selector(selector, |k| t.host_label_cluster(k));
    out.match_labels.get_or_insert_with(BTreeMap::new).insert(MARKER_LABEL.to_string(), t.marker().to_string());
    out
}
