//! Mapper constructors for the built-in resource types.

use std::sync::Arc;

use vkube_core::gvk;
use vkube_translate::Translator;

use crate::{GenericMapper, Registry, Scope};

/// Virtual namespaces map onto host namespaces by the translator's namespace rule.
pub fn namespaces_mapper(translator: Arc<dyn Translator>) -> GenericMapper {
    GenericMapper::new(gvk::namespaces(), translator, Scope::Cluster, Arc::new(|t: &dyn Translator, name: &str, _: &str| t.host_namespace(name)))
}

pub fn register_default_mappers(registry: &Registry, translator: Arc<dyn Translator>) {
    let namespaced = [
        gvk::secrets(),
        gvk::config_maps(),
        gvk::services(),
        gvk::pods(),
        gvk::persistent_volume_claims(),
        gvk::endpoints(),
        gvk::service_accounts(),
        gvk::ingresses(),
    ];
    for g in namespaced {
        registry.add_mapper(Arc::new(GenericMapper::namespaced(g, translator.clone())));
    }
    for g in [gvk::storage_classes(), gvk::ingress_classes(), gvk::priority_classes()] {
        registry.add_mapper(Arc::new(GenericMapper::cluster(g, translator.clone())));
    }
    registry.add_mapper(Arc::new(namespaces_mapper(translator)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkube_core::NamespacedName;
    use vkube_translate::SingleNamespaceTranslator;

    #[test]
    fn defaults_cover_builtin_kinds() {
        let reg = Registry::new();
        register_default_mappers(&reg, Arc::new(SingleNamespaceTranslator::new("suffix", "test")));
        for g in [gvk::secrets(), gvk::config_maps(), gvk::storage_classes(), gvk::namespaces()] {
            assert!(reg.has(&g), "{:?}", g);
        }
        assert!(!reg.has(&gvk::nodes()));
        assert_eq!(reg.virtual_to_host(&gvk::namespaces(), "default", "").unwrap(), NamespacedName::cluster("test"));
    }
}
