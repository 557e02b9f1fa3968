use vkube_core::NamespacedName;
use vkube_mappings::MappingError;
use vkube_patches::{ConfigError, PatchError};

/// Errors from a cluster API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: NamespacedName },
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: NamespacedName },
    #[error("resource {0} is not served by the cluster")]
    UnknownResource(String),
    #[error("object has no name")]
    MissingName,
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("conflict: cannot sync virtual object {virtual_key} as unmanaged physical object {host_key} exists with desired name")]
    Conflict { virtual_key: NamespacedName, host_key: NamespacedName },
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("reconcile cancelled")]
    Cancelled,
}

impl SyncError {
    /// Registration or configuration defects. The controller stops on these.
    pub fn is_fatal(&self) -> bool { matches!(self, SyncError::Mapping(_) | SyncError::Config(_)) }

    pub fn is_conflict(&self) -> bool { matches!(self, SyncError::Conflict { .. }) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_objects() {
        let err = SyncError::Conflict { virtual_key: NamespacedName::new("default", "a"), host_key: NamespacedName::new("test", "a-x-default-x-suffix") };
        assert_eq!(
            err.to_string(),
            "conflict: cannot sync virtual object default/a as unmanaged physical object test/a-x-default-x-suffix exists with desired name"
        );
        assert!(!err.is_fatal());
        assert!(SyncError::Mapping(MappingError::NotFound("/v1, Kind=Secret".into())).is_fatal());
        assert!(!SyncError::Cancelled.is_fatal());
    }
}
