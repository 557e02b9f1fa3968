use crate::config::PatchOp;

/// Problems found while loading export configuration. Never raised mid-reconcile.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid Regex: {regex:?}: {reason}")]
    InvalidRegex { regex: String, reason: String },
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("invalid {op} patch at {path:?}: {reason}")]
    InvalidPatch { op: PatchOp, path: String, reason: String },
    #[error("invalid export {0}")]
    InvalidExport(String),
}

/// Failures while applying patches to an object.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("translation not supported from host to virtual object")]
    TranslationUnsupported,
    #[error("{op} {path}: {reason}")]
    Apply { op: PatchOp, path: String, reason: String },
    #[error("object (de)serialization: {0}")]
    Json(#[from] serde_json::Error),
}

impl PatchError {
    pub(crate) fn apply(op: PatchOp, path: &str, reason: impl Into<String>) -> Self {
        PatchError::Apply { op, path: path.to_string(), reason: reason.into() }
    }
}
