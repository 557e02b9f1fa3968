//! vkube translate: deterministic virtual -> host identity translation.
//!
//! Every function here is pure: nothing consults cluster state. The host
//! name of a namespaced virtual object embeds both its name and namespace so
//! that tenants collapsing into one host namespace never collide:
//! `<name>-x-<namespace>-x-<suffix>`.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod labels;
pub mod metadata;

pub use labels::{host_label_selector, host_label_selector_cluster, host_labels_map};
pub use metadata::{host_annotations, host_labels, host_metadata, owner_of, Ownership};

/// Kubernetes object names (DNS-1123 labels) are capped at 63 bytes.
const MAX_NAME_LEN: usize = 63;
const TRUNCATED_LEN: usize = 52;

/// First 10 hex characters of the SHA-256 digest of `input`.
pub fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = hex::encode(digest);
    out.truncate(10);
    out
}

/// Join `parts` with `-`. Results longer than 63 bytes are cut to 52 bytes and
/// suffixed with a digest of the full joined value, keeping them unique.
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LEN {
        return full;
    }
    let mut cut = TRUNCATED_LEN;
    while !full.is_char_boundary(cut) { cut -= 1; }
    format!("{}-{}", &full[..cut], short_digest(&full)).replace(".-", "-")
}

/// Disambiguator appended to host names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuffixPolicy {
    /// Fixed tag, usually the virtual cluster instance name.
    Static(String),
    /// Digest of a seed string; stable as long as the seed is.
    Digest(String),
}

impl SuffixPolicy {
    pub fn render(&self) -> String {
        match self {
            SuffixPolicy::Static(tag) => tag.clone(),
            SuffixPolicy::Digest(seed) => short_digest(seed),
        }
    }
}

/// Identity translation rules between the virtual and the host cluster.
pub trait Translator: Send + Sync {
    /// Name of the virtual cluster instance; value of the managed-by marker.
    fn marker(&self) -> &str;

    fn host_namespace(&self, v_namespace: &str) -> String;

    /// Host name of a namespaced virtual object. Must be deterministic and
    /// injective over `(v_name, v_namespace)`.
    fn host_name(&self, v_name: &str, v_namespace: &str) -> String;

    /// Host name of a cluster-scoped virtual object.
    fn host_name_cluster(&self, v_name: &str) -> String;

    /// Label key on namespaced host objects.
    fn host_label(&self, key: &str) -> String;

    /// Label key on cluster-scoped host objects.
    fn host_label_cluster(&self, key: &str) -> String;
}

/// All virtual namespaces collapse into one host namespace.
#[derive(Debug, Clone)]
pub struct SingleNamespaceTranslator {
    name: String,
    target_namespace: String,
    suffix: String,
}

impl SingleNamespaceTranslator {
    /// Translator whose host-name suffix is the instance name.
    pub fn new(name: impl Into<String>, target_namespace: impl Into<String>) -> Self {
        let name = name.into();
        let suffix = name.clone();
        Self { name, target_namespace: target_namespace.into(), suffix }
    }

    pub fn with_suffix(mut self, policy: &SuffixPolicy) -> Self {
        self.suffix = policy.render();
        self
    }

    pub fn target_namespace(&self) -> &str { &self.target_namespace }
    pub fn suffix(&self) -> &str { &self.suffix }
}

impl Translator for SingleNamespaceTranslator {
    fn marker(&self) -> &str { &self.name }

    fn host_namespace(&self, _v_namespace: &str) -> String { self.target_namespace.clone() }

    fn host_name(&self, v_name: &str, v_namespace: &str) -> String {
        if v_name.is_empty() {
            return String::new();
        }
        safe_concat_name(&[v_name, "x", v_namespace, "x", &self.suffix])
    }

    fn host_name_cluster(&self, v_name: &str) -> String {
        if v_name.is_empty() {
            return String::new();
        }
        safe_concat_name(&["vcluster", v_name, "x", &self.target_namespace, "x", &self.suffix])
    }

    fn host_label(&self, key: &str) -> String {
        if labels::is_reserved(key) {
            labels::convert_label_key(&self.name, key)
        } else {
            key.to_string()
        }
    }

    fn host_label_cluster(&self, key: &str) -> String { labels::convert_label_key(&self.name, key) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_name_embeds_name_and_namespace() {
        let t = SingleNamespaceTranslator::new("suffix", "test");
        assert_eq!(t.host_name("a", "default"), "a-x-default-x-suffix");
        assert_eq!(t.host_namespace("default"), "test");
        assert_eq!(t.host_namespace("kube-system"), "test");
        assert_eq!(t.host_name("", "default"), "");
    }

    #[test]
    fn host_names_do_not_collide_across_namespaces() {
        let t = SingleNamespaceTranslator::new("suffix", "test");
        assert_ne!(t.host_name("a", "team1"), t.host_name("a", "team2"));
        assert_eq!(t.host_name("a", "team1"), t.host_name("a", "team1"));
    }

    #[test]
    fn long_names_are_truncated_with_digest() {
        let long = "n".repeat(60);
        let out = safe_concat_name(&[&long, "x", "default", "x", "suffix"]);
        assert_eq!(out.len(), 63);
        assert!(out.starts_with(&"n".repeat(52)));
        let other = safe_concat_name(&[&long, "x", "other", "x", "suffix"]);
        assert_ne!(out, other);
    }

    #[test]
    fn truncation_collapses_dot_dash() {
        let name = format!("{}.{}", "a".repeat(51), "b".repeat(20));
        let out = safe_concat_name(&[&name, "x", "ns", "x", "s"]);
        assert!(!out.contains(".-"), "{out}");
    }

    #[test]
    fn cluster_scoped_names_carry_instance() {
        let t = SingleNamespaceTranslator::new("suffix", "test");
        assert_eq!(t.host_name_cluster("standard"), "vcluster-standard-x-test-x-suffix");
    }

    #[test]
    fn digest_suffix_is_stable() {
        let t = SingleNamespaceTranslator::new("vc", "test").with_suffix(&SuffixPolicy::Digest("seed".into()));
        assert_eq!(t.suffix().len(), 10);
        assert_eq!(t.host_name("a", "default"), t.host_name("a", "default"));
        assert!(t.host_name("a", "default").starts_with("a-x-default-x-"));
    }
}
