//! `vkube.yaml` loading, env overrides and validation.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use vkube_core::gvk_key;
use vkube_patches::{CompiledExport, ExportConfig};
use vkube_syncer::Backoff;
use vkube_translate::{SingleNamespaceTranslator, SuffixPolicy};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub host_namespace: String,
    #[serde(default)]
    pub suffix: Option<SuffixPolicy>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub sync: SyncToggles,
    #[serde(default)]
    pub exports: Vec<ExportConfig>,
}

fn default_workers() -> usize { 4 }

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    pub base_millis: u64,
    pub max_seconds: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self { Self { base_millis: 5, max_seconds: 1000 } }
}

impl BackoffConfig {
    pub fn backoff(&self) -> Backoff { Backoff { base: Duration::from_millis(self.base_millis), max: Duration::from_secs(self.max_seconds) } }
}

/// Built-in resource syncers to run.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncToggles {
    pub secrets: bool,
    pub config_maps: bool,
    pub storage_classes: bool,
}

impl Default for SyncToggles {
    fn default() -> Self { Self { secrets: true, config_maps: true, storage_classes: false } }
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self> { serde_yaml::from_str(raw).context("parsing config") }

    /// Read `path`, apply `VKUBE_*` overrides from the process env.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let mut cfg = Self::from_yaml(&raw).with_context(|| format!("in {}", path.display()))?;
        cfg.apply_overrides(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("VKUBE_NAME") {
            self.name = v;
        }
        if let Some(v) = lookup("VKUBE_HOST_NAMESPACE") {
            self.host_namespace = v;
        }
        if let Some(v) = lookup("VKUBE_WORKERS") {
            self.workers = v.parse().with_context(|| format!("VKUBE_WORKERS={v} is not a number"))?;
        }
        Ok(())
    }

    /// Check the instance settings and compile every export. Nothing runs
    /// until this succeeds.
    pub fn validate(&self) -> Result<Vec<CompiledExport>> {
        if self.name.is_empty() {
            bail!("name is required");
        }
        if self.host_namespace.is_empty() {
            bail!("hostNamespace is required");
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        let mut seen = FxHashSet::default();
        let mut out = Vec::with_capacity(self.exports.len());
        for (i, e) in self.exports.iter().enumerate() {
            let compiled = e.validate().with_context(|| format!("exports[{i}] ({}/{})", e.api_version, e.kind))?;
            if !seen.insert(gvk_key(&compiled.gvk)) {
                bail!("exports[{i}]: {} is exported twice", gvk_key(&compiled.gvk));
            }
            out.push(compiled);
        }
        Ok(out)
    }

    pub fn translator(&self) -> SingleNamespaceTranslator {
        let policy = self.suffix.clone().unwrap_or_else(|| SuffixPolicy::Static(self.name.clone()));
        SingleNamespaceTranslator::new(self.name.clone(), self.host_namespace.clone()).with_suffix(&policy)
    }
}
