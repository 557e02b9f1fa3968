use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vkube_core::{DynamicObject, GroupVersionKind, NamespacedName};
use vkube_mappings::Registry;
use vkube_translate::Translator;

use crate::client::ClusterClient;
use crate::error::{ClientError, SyncError};

/// Everything a reconcile needs. Cheap to clone.
#[derive(Clone)]
pub struct SyncContext {
    pub virtual_client: Arc<dyn ClusterClient>,
    pub host_client: Arc<dyn ClusterClient>,
    pub translator: Arc<dyn Translator>,
    pub registry: Arc<Registry>,
    pub cancel: CancellationToken,
}

impl SyncContext {
    pub fn new(virtual_client: Arc<dyn ClusterClient>, host_client: Arc<dyn ClusterClient>, translator: Arc<dyn Translator>, registry: Arc<Registry>) -> Self {
        Self { virtual_client, host_client, translator, registry, cancel: CancellationToken::new() }
    }

    /// Same clients, own cancellation scope nested under this one.
    pub fn child(&self) -> Self { Self { cancel: self.cancel.child_token(), ..self.clone() } }

    /// Run a cluster call unless the context is cancelled first.
    pub async fn guarded<T>(&self, call: impl Future<Output = Result<T, ClientError>>) -> Result<T, SyncError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            res = call => res.map_err(SyncError::from),
        }
    }

    pub async fn get_virtual(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<Option<DynamicObject>, SyncError> {
        self.guarded(self.virtual_client.get(gvk, key)).await
    }

    pub async fn get_host(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<Option<DynamicObject>, SyncError> {
        self.guarded(self.host_client.get(gvk, key)).await
    }
}
