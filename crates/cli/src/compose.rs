//! Composition root: one registry, one context, one controller per synced GVK.

use std::sync::Arc;

use vkube_mappings::{register_default_mappers, GenericMapper, Registry};
use vkube_patches::{CompiledExport, ExportPatcher};
use vkube_syncer::{ClusterClient, ExportSyncer, GenericSyncer, SyncContext, SyncController, Syncer};
use vkube_translate::Translator;

use crate::config::Config;

/// Every export GVK gets a namespaced mapper next to the built-in ones.
pub fn registry(translator: Arc<dyn Translator>, exports: &[CompiledExport]) -> Registry {
    let registry = Registry::new();
    register_default_mappers(&registry, translator.clone());
    for e in exports {
        registry.add_mapper(Arc::new(GenericMapper::namespaced(e.gvk.clone(), translator.clone())));
    }
    registry
}

pub fn syncers(cfg: &Config, translator: Arc<dyn Translator>, exports: Vec<CompiledExport>) -> Vec<Arc<dyn Syncer>> {
    let mut out: Vec<Arc<dyn Syncer>> = Vec::new();
    if cfg.sync.secrets {
        out.push(Arc::new(GenericSyncer::secrets()));
    }
    if cfg.sync.config_maps {
        out.push(Arc::new(GenericSyncer::config_maps()));
    }
    if cfg.sync.storage_classes {
        out.push(Arc::new(GenericSyncer::storage_classes()));
    }
    for e in exports {
        out.push(Arc::new(ExportSyncer::new(ExportPatcher::new(Arc::new(e), translator.clone()))));
    }
    out
}

/// Controllers share clients and registry; each gets its own cancellation
/// scope under `root`, so a fatal error in one leaves the others running
/// until the caller decides otherwise.
pub fn controllers(cfg: &Config, exports: Vec<CompiledExport>, virtual_client: Arc<dyn ClusterClient>, host_client: Arc<dyn ClusterClient>) -> (SyncContext, Vec<Arc<SyncController>>) {
    let translator: Arc<dyn Translator> = Arc::new(cfg.translator());
    let registry = Arc::new(registry(translator.clone(), &exports));
    let root = SyncContext::new(virtual_client, host_client, translator.clone(), registry);
    let controllers = syncers(cfg, translator, exports)
        .into_iter()
        .map(|s| Arc::new(SyncController::new(root.child(), s, cfg.backoff.backoff())))
        .collect();
    (root, controllers)
}
