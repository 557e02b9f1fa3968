use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use regex::Regex;
use vkube_core::NamespacedName;
use vkube_translate::{host_label_selector, host_label_selector_cluster, Translator};

use crate::error::PatchError;
use crate::name_regex::process_regex;

/// Translates names, namespaces and label references embedded in object fields.
pub trait NameResolver {
    fn translate_name(&self, name: &str, regex: Option<&Regex>) -> Result<String, PatchError>;
    fn translate_name_with_namespace(&self, name: &str, namespace: &str, regex: Option<&Regex>) -> Result<String, PatchError>;
    fn translate_label_key(&self, key: &str) -> Result<String, PatchError>;
    fn translate_label_selector(&self, selector: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>, PatchError>;
    fn translate_label_expressions_selector(&self, selector: &LabelSelector) -> Result<LabelSelector, PatchError>;
    fn translate_namespace_ref(&self, namespace: &str) -> Result<String, PatchError>;
}

/// Resolves references found in a virtual object living in `namespace`.
pub struct VirtualToHostResolver<'a> {
    translator: &'a dyn Translator,
    namespace: String,
}

impl<'a> VirtualToHostResolver<'a> {
    pub fn new(translator: &'a dyn Translator, namespace: impl Into<String>) -> Self {
        Self { translator, namespace: namespace.into() }
    }

    fn host_key(&self, name: &str, namespace: &str) -> NamespacedName {
        let ns = if namespace.is_empty() { self.namespace.as_str() } else { namespace };
        NamespacedName::new(self.translator.host_namespace(ns), self.translator.host_name(name, ns))
    }
}

impl NameResolver for VirtualToHostResolver<'_> {
    fn translate_name(&self, name: &str, regex: Option<&Regex>) -> Result<String, PatchError> {
        self.translate_name_with_namespace(name, "", regex)
    }

    fn translate_name_with_namespace(&self, name: &str, namespace: &str, regex: Option<&Regex>) -> Result<String, PatchError> {
        match regex {
            Some(re) => process_regex(re, name, |n, ns| Ok(self.host_key(n, if ns.is_empty() { namespace } else { ns }))),
            None => Ok(self.host_key(name, namespace).name),
        }
    }

    fn translate_label_key(&self, key: &str) -> Result<String, PatchError> { Ok(self.translator.host_label(key)) }

    fn translate_label_selector(&self, selector: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>, PatchError> {
        let sel = LabelSelector { match_labels: Some(selector.clone()), ..Default::default() };
        Ok(host_label_selector(self.translator, &sel, Some(&self.namespace)).match_labels.unwrap_or_default())
    }

    fn translate_label_expressions_selector(&self, selector: &LabelSelector) -> Result<LabelSelector, PatchError> {
        Ok(host_label_selector_cluster(self.translator, selector))
    }

    fn translate_namespace_ref(&self, namespace: &str) -> Result<String, PatchError> { Ok(self.translator.host_namespace(namespace)) }
}

/// Host objects carry no information to reconstruct virtual references from,
/// so every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostToVirtualResolver;

impl NameResolver for HostToVirtualResolver {
    fn translate_name(&self, _: &str, _: Option<&Regex>) -> Result<String, PatchError> { Err(PatchError::TranslationUnsupported) }
    fn translate_name_with_namespace(&self, _: &str, _: &str, _: Option<&Regex>) -> Result<String, PatchError> { Err(PatchError::TranslationUnsupported) }
    fn translate_label_key(&self, _: &str) -> Result<String, PatchError> { Err(PatchError::TranslationUnsupported) }
    fn translate_label_selector(&self, _: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>, PatchError> { Err(PatchError::TranslationUnsupported) }
    fn translate_label_expressions_selector(&self, _: &LabelSelector) -> Result<LabelSelector, PatchError> { Err(PatchError::TranslationUnsupported) }
    fn translate_namespace_ref(&self, _: &str) -> Result<String, PatchError> { Err(PatchError::TranslationUnsupported) }
}
