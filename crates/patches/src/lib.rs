//! vkube patches: declarative field transformations between a virtual object
//! and its host counterpart.
//!
//! Forward patches build the desired host object from the virtual one, reverse
//! patches copy host-owned fields (usually `status`) back. Every patch set is
//! applied to a staged copy; the destination changes only when all patches
//! succeed.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde_json::Value as Json;
use tracing::trace;
use vkube_core::DynamicObject;

pub mod config;
pub mod diff;
pub mod error;
pub mod export;
pub mod name_regex;
pub mod path;
pub mod resolver;

pub use config::{CompiledExport, ConditionConfig, ExportConfig, Patch, PatchConfig, PatchOp};
pub use diff::{diff_summary, DiffSummary};
pub use error::{ConfigError, PatchError};
pub use export::ExportPatcher;
pub use path::JsonPath;
pub use resolver::{HostToVirtualResolver, NameResolver, VirtualToHostResolver};

/// Apply `patches` to `dest`, reading from `source`. Afterwards the paths of
/// `reverse_patches` are stripped from `dest` unless marked `ignore: false`.
/// On error `dest` is left untouched.
pub fn apply_patches(dest: &mut Json, source: &Json, patches: &[Patch], reverse_patches: &[Patch], resolver: &dyn NameResolver) -> Result<(), PatchError> {
    let mut staged = dest.clone();
    for p in patches {
        apply_patch(&mut staged, source, p, resolver)?;
    }
    for p in reverse_patches {
        if p.ignore == Some(false) {
            continue;
        }
        p.path.remove(&mut staged);
    }
    *dest = staged;
    Ok(())
}

/// `apply_patches` over typed objects.
pub fn apply_to_object(dest: &mut DynamicObject, source: &DynamicObject, patches: &[Patch], reverse_patches: &[Patch], resolver: &dyn NameResolver) -> Result<(), PatchError> {
    let mut dest_json = serde_json::to_value(&*dest)?;
    let source_json = serde_json::to_value(source)?;
    apply_patches(&mut dest_json, &source_json, patches, reverse_patches, resolver)?;
    *dest = serde_json::from_value(dest_json)?;
    Ok(())
}

fn apply_patch(dest: &mut Json, source: &Json, p: &Patch, resolver: &dyn NameResolver) -> Result<(), PatchError> {
    if !p.root_conditions_hold(dest) {
        trace!(op = %p.op, path = %p.path, "root conditions not met");
        return Ok(());
    }
    let path = p.path.as_str();
    match p.op {
        config::PatchOp::Replace => {
            let value = p.value.as_ref().ok_or_else(|| PatchError::apply(p.op, path, "missing value"))?;
            p.path.for_each_mut(dest, |node| -> Result<(), PatchError> {
                if p.node_conditions_hold(node) { *node = value.clone(); }
                Ok(())
            })?;
        }
        config::PatchOp::Add => {
            let value = p.value.as_ref().ok_or_else(|| PatchError::apply(p.op, path, "missing value"))?;
            if p.node_conditions_hold(p.path.first(dest).unwrap_or(&Json::Null)) {
                p.path.set(dest, value, true).map_err(|e| PatchError::apply(p.op, path, e))?;
            }
        }
        config::PatchOp::Remove => {
            p.path.remove_where(dest, &|node| !p.node_conditions_hold(node));
        }
        config::PatchOp::CopyFromObject => {
            let from = p.from_path.as_ref().unwrap_or(&p.path);
            if !p.node_conditions_hold(p.path.first(dest).unwrap_or(&Json::Null)) {
                return Ok(());
            }
            match from.first(source) {
                Some(v) => {
                    let v = v.clone();
                    p.path.set(dest, &v, false).map_err(|e| PatchError::apply(p.op, path, e))?;
                }
                None => {
                    p.path.remove(dest);
                }
            }
        }
        config::PatchOp::RewriteName => {
            p.path.for_each_mut(dest, |node| if p.node_conditions_hold(node) { rewrite_name(node, p, resolver) } else { Ok(()) })?;
        }
        config::PatchOp::RewriteNamespace => {
            p.path.for_each_mut(dest, |node| rewrite_string(node, p, |s| resolver.translate_namespace_ref(s)))?;
        }
        config::PatchOp::RewriteLabelKey => {
            p.path.for_each_mut(dest, |node| rewrite_string(node, p, |s| resolver.translate_label_key(s)))?;
        }
        config::PatchOp::RewriteLabelSelector => {
            p.path.for_each_mut(dest, |node| -> Result<(), PatchError> {
                if node.is_null() || !p.node_conditions_hold(node) {
                    return Ok(());
                }
                let labels: BTreeMap<String, String> =
                    serde_json::from_value(node.clone()).map_err(|e| PatchError::apply(p.op, path, format!("expected a label map: {}", e)))?;
                *node = serde_json::to_value(resolver.translate_label_selector(&labels)?)?;
                Ok(())
            })?;
        }
        config::PatchOp::RewriteLabelExpressionsSelector => {
            p.path.for_each_mut(dest, |node| -> Result<(), PatchError> {
                if node.is_null() || !p.node_conditions_hold(node) {
                    return Ok(());
                }
                let sel: LabelSelector =
                    serde_json::from_value(node.clone()).map_err(|e| PatchError::apply(p.op, path, format!("expected a label selector: {}", e)))?;
                *node = serde_json::to_value(resolver.translate_label_expressions_selector(&sel)?)?;
                Ok(())
            })?;
        }
    }
    Ok(())
}

fn rewrite_string(node: &mut Json, p: &Patch, f: impl Fn(&str) -> Result<String, PatchError>) -> Result<(), PatchError> {
    if node.is_null() || !p.node_conditions_hold(node) {
        return Ok(());
    }
    match node.as_str() {
        Some(s) => {
            *node = Json::String(f(s)?);
            Ok(())
        }
        None => Err(PatchError::apply(p.op, p.path.as_str(), "expected a string")),
    }
}

fn rewrite_name(node: &mut Json, p: &Patch, resolver: &dyn NameResolver) -> Result<(), PatchError> {
    let regex = p.regex.as_ref();
    if node.is_null() {
        return Ok(());
    }
    if let Some(s) = node.as_str() {
        *node = Json::String(resolver.translate_name(s, regex)?);
        return Ok(());
    }
    if !node.is_object() || (p.name_path.is_none() && p.namespace_path.is_none()) {
        return Err(PatchError::apply(p.op, p.path.as_str(), "expected a string or an object with namePath/namespacePath"));
    }
    let read = |path: &Option<JsonPath>, node: &Json| path.as_ref().and_then(|np| np.first(node)).and_then(Json::as_str).map(str::to_string);
    let name = read(&p.name_path, &*node);
    let namespace = read(&p.namespace_path, &*node);
    let fail = |e: String| PatchError::apply(p.op, p.path.as_str(), e);
    if let (Some(np), Some(name)) = (&p.name_path, &name) {
        let translated = match &namespace {
            Some(ns) => resolver.translate_name_with_namespace(name, ns, regex)?,
            None => resolver.translate_name(name, regex)?,
        };
        np.set(node, &Json::String(translated), false).map_err(fail)?;
    }
    if let (Some(nsp), Some(ns)) = (&p.namespace_path, &namespace) {
        let translated = resolver.translate_namespace_ref(ns)?;
        nsp.set(node, &Json::String(translated), false).map_err(fail)?;
    }
    Ok(())
}
