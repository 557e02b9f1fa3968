//! Export configuration: the serde shape read from YAML and its compiled form.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use vkube_core::{split_api_version, GroupVersionKind};

use crate::error::ConfigError;
use crate::name_regex::prepare_regex;
use crate::path::JsonPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchOp {
    Replace,
    Add,
    Remove,
    CopyFromObject,
    RewriteName,
    RewriteNamespace,
    RewriteLabelKey,
    RewriteLabelSelector,
    RewriteLabelExpressionsSelector,
}

impl PatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchOp::Replace => "replace",
            PatchOp::Add => "add",
            PatchOp::Remove => "remove",
            PatchOp::CopyFromObject => "copyFromObject",
            PatchOp::RewriteName => "rewriteName",
            PatchOp::RewriteNamespace => "rewriteNamespace",
            PatchOp::RewriteLabelKey => "rewriteLabelKey",
            PatchOp::RewriteLabelSelector => "rewriteLabelSelector",
            PatchOp::RewriteLabelExpressionsSelector => "rewriteLabelExpressionsSelector",
        }
    }

    /// Ops that need a name resolver to do anything.
    pub fn is_rewrite(self) -> bool {
        matches!(
            self,
            PatchOp::RewriteName | PatchOp::RewriteNamespace | PatchOp::RewriteLabelKey | PatchOp::RewriteLabelSelector | PatchOp::RewriteLabelExpressionsSelector
        )
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_equal: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchConfig {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionConfig>,
    /// Reverse patches only: `false` keeps the field in forward applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportConfig {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub patches: Vec<PatchConfig>,
    #[serde(default)]
    pub reverse_patches: Vec<PatchConfig>,
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub path: Option<JsonPath>,
    pub sub_path: Option<JsonPath>,
    pub equal: Option<Json>,
    pub not_equal: Option<Json>,
    pub empty: Option<bool>,
}

fn is_empty_value(v: Option<&Json>) -> bool {
    match v {
        None | Some(Json::Null) => true,
        Some(Json::String(s)) => s.is_empty(),
        Some(Json::Array(a)) => a.is_empty(),
        Some(Json::Object(m)) => m.is_empty(),
        Some(_) => false,
    }
}

impl Condition {
    /// Conditions with `path` test the whole destination object.
    pub fn is_root(&self) -> bool { self.path.is_some() }

    pub fn holds(&self, root: &Json, node: &Json) -> bool {
        let target = match (&self.path, &self.sub_path) {
            (Some(p), _) => p.first(root),
            (None, Some(sp)) => sp.first(node),
            (None, None) => Some(node),
        };
        if let Some(eq) = &self.equal {
            if target != Some(eq) { return false; }
        }
        if let Some(ne) = &self.not_equal {
            if target == Some(ne) { return false; }
        }
        if let Some(empty) = self.empty {
            if is_empty_value(target) != empty { return false; }
        }
        true
    }
}

/// Validated patch ready to apply.
#[derive(Debug, Clone)]
pub struct Patch {
    pub op: PatchOp,
    pub path: JsonPath,
    pub from_path: Option<JsonPath>,
    pub name_path: Option<JsonPath>,
    pub namespace_path: Option<JsonPath>,
    pub value: Option<Json>,
    pub regex: Option<Regex>,
    pub conditions: Vec<Condition>,
    pub ignore: Option<bool>,
}

impl Patch {
    pub fn root_conditions_hold(&self, root: &Json) -> bool {
        self.conditions.iter().filter(|c| c.is_root()).all(|c| c.holds(root, root))
    }

    pub fn node_conditions_hold(&self, node: &Json) -> bool {
        self.conditions.iter().filter(|c| !c.is_root()).all(|c| c.holds(node, node))
    }
}

#[derive(Debug, Clone)]
pub struct CompiledExport {
    pub gvk: GroupVersionKind,
    pub patches: Vec<Patch>,
    pub reverse_patches: Vec<Patch>,
}

fn parse_path(raw: &str) -> Result<JsonPath, ConfigError> {
    JsonPath::parse(raw).map_err(|reason| ConfigError::InvalidPath { path: raw.to_string(), reason })
}

fn parse_opt(raw: Option<&String>) -> Result<Option<JsonPath>, ConfigError> { raw.map(|p| parse_path(p)).transpose() }

impl ConditionConfig {
    pub fn compile(&self) -> Result<Condition, ConfigError> {
        if self.path.is_some() && self.sub_path.is_some() {
            return Err(ConfigError::InvalidPath { path: self.path.clone().unwrap_or_default(), reason: "condition sets both path and subPath".into() });
        }
        Ok(Condition {
            path: parse_opt(self.path.as_ref())?,
            sub_path: parse_opt(self.sub_path.as_ref())?,
            equal: self.equal.clone(),
            not_equal: self.not_equal.clone(),
            empty: self.empty,
        })
    }
}

impl PatchConfig {
    pub fn compile(&self) -> Result<Patch, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPatch { op: self.op, path: self.path.clone(), reason: reason.to_string() };
        match self.op {
            PatchOp::Replace | PatchOp::Add if self.value.is_none() => return Err(invalid("value is required")),
            _ => {}
        }
        if self.regex.is_some() && self.op != PatchOp::RewriteName {
            return Err(invalid("regex is only supported by rewriteName"));
        }
        if self.from_path.is_some() && self.op != PatchOp::CopyFromObject {
            return Err(invalid("fromPath is only supported by copyFromObject"));
        }
        if (self.name_path.is_some() || self.namespace_path.is_some()) && self.op != PatchOp::RewriteName {
            return Err(invalid("namePath/namespacePath are only supported by rewriteName"));
        }
        let regex = self.regex.as_deref().map(prepare_regex).transpose()?;
        Ok(Patch {
            op: self.op,
            path: parse_path(&self.path)?,
            from_path: parse_opt(self.from_path.as_ref())?,
            name_path: parse_opt(self.name_path.as_ref())?,
            namespace_path: parse_opt(self.namespace_path.as_ref())?,
            value: self.value.clone(),
            regex,
            conditions: self.conditions.iter().map(ConditionConfig::compile).collect::<Result<_, _>>()?,
            ignore: self.ignore,
        })
    }
}

impl ExportConfig {
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = split_api_version(&self.api_version);
        GroupVersionKind::gvk(group, version, &self.kind)
    }

    /// Compile and check every patch. Reverse patches run without a name
    /// resolver, so rewrite ops are rejected there.
    pub fn validate(&self) -> Result<CompiledExport, ConfigError> {
        if self.api_version.is_empty() || self.kind.is_empty() {
            return Err(ConfigError::InvalidExport("apiVersion and kind are required".into()));
        }
        let patches = self.patches.iter().map(PatchConfig::compile).collect::<Result<Vec<_>, _>>()?;
        let mut reverse_patches = Vec::with_capacity(self.reverse_patches.len());
        for p in &self.reverse_patches {
            if p.op.is_rewrite() {
                return Err(ConfigError::InvalidPatch { op: p.op, path: p.path.clone(), reason: "rewrite ops are not supported in reversePatches".into() });
            }
            reverse_patches.push(p.compile()?);
        }
        Ok(CompiledExport { gvk: self.gvk(), patches, reverse_patches })
    }
}
