//! Cluster API seam. `KubeCluster` talks to a real API server, `fake::FakeCluster`
//! keeps objects in memory for tests.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    api::{Api, DeleteParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::ApiResource,
    discovery::{self, Scope},
    runtime::{watcher, WatchStreamExt},
    Client,
};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use vkube_core::{gvk_key, DynamicObject, GroupVersionKind, NamespacedName};

use crate::error::ClientError;

pub const FIELD_MANAGER: &str = "vkube-syncer";

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Applied(DynamicObject),
    Deleted(DynamicObject),
    Restarted(Vec<DynamicObject>),
}

impl WatchEvent {
    pub fn objects(&self) -> &[DynamicObject] {
        match self {
            WatchEvent::Applied(o) | WatchEvent::Deleted(o) => std::slice::from_ref(o),
            WatchEvent::Restarted(list) => list,
        }
    }
}

/// The operations the syncer needs from one cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<Option<DynamicObject>, ClientError>;
    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;
    /// Full replace; `obj` must carry the live resourceVersion.
    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;
    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;
    async fn delete(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<(), ClientError>;
    /// List+watch `gvk` and forward events until the receiver is dropped.
    async fn watch(&self, gvk: &GroupVersionKind, namespace: Option<&str>, tx: mpsc::Sender<WatchEvent>) -> Result<(), ClientError>;
}

pub struct KubeCluster {
    client: Client,
    resources: Mutex<FxHashMap<GroupVersionKind, (ApiResource, bool)>>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self { Self { client, resources: Mutex::new(FxHashMap::default()) } }

    /// Build from an explicit kubeconfig, or infer (env/in-cluster) when `path` is `None`.
    pub async fn from_kubeconfig(path: Option<&Path>, context: Option<&str>) -> anyhow::Result<Self> {
        let config = match path {
            Some(p) => {
                let kc = Kubeconfig::read_from(p).with_context(|| format!("reading kubeconfig {}", p.display()))?;
                let opts = KubeConfigOptions { context: context.map(str::to_string), ..Default::default() };
                kube::Config::from_custom_kubeconfig(kc, &opts).await.context("loading kubeconfig")?
            }
            None => kube::Config::infer().await.context("inferring kube config")?,
        };
        let client = Client::try_from(config).context("building kube client")?;
        info!(default_ns = %client.default_namespace(), "kube client ready");
        Ok(Self::new(client))
    }

    async fn api_resource(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool), ClientError> {
        let cached = self.resources.lock().unwrap_or_else(|p| p.into_inner()).get(gvk).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let (ar, caps) = discovery::pinned_kind(&self.client, gvk).await.map_err(|e| match e {
            kube::Error::Discovery(_) => ClientError::UnknownResource(gvk_key(gvk)),
            other => ClientError::Kube(other),
        })?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        debug!(gvk = %gvk_key(gvk), plural = %ar.plural, namespaced, "api resource discovered");
        self.resources.lock().unwrap_or_else(|p| p.into_inner()).insert(gvk.clone(), (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, ClientError> {
        let (ar, namespaced) = self.api_resource(gvk).await?;
        Ok(match namespace {
            Some(ns) if namespaced && !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }

    async fn api_for(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<(Api<DynamicObject>, String), ClientError> {
        let name = obj.metadata.name.clone().ok_or(ClientError::MissingName)?;
        Ok((self.api(gvk, obj.metadata.namespace.as_deref()).await?, name))
    }
}

fn status_code(e: &kube::Error) -> Option<u16> {
    match e {
        kube::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

/// Watch failures backoff cannot fix: the resource is gone or access is denied.
fn is_terminal(e: &kube::Error) -> bool { matches!(status_code(e), Some(401 | 403 | 404)) }

fn post_params() -> PostParams { PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..Default::default() } }

fn key_of(obj: &DynamicObject) -> NamespacedName { NamespacedName::of(obj) }

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<Option<DynamicObject>, ClientError> {
        let api = self.api(gvk, key.namespace_opt()).await?;
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let (api, _) = self.api_for(gvk, obj).await?;
        api.create(&post_params(), obj).await.map_err(|e| match status_code(&e) {
            Some(409) => ClientError::AlreadyExists { kind: gvk.kind.clone(), key: key_of(obj) },
            _ => ClientError::Kube(e),
        })
    }

    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let (api, name) = self.api_for(gvk, obj).await?;
        api.replace(&name, &post_params(), obj).await.map_err(|e| match status_code(&e) {
            Some(404) => ClientError::NotFound { kind: gvk.kind.clone(), key: key_of(obj) },
            _ => ClientError::Kube(e),
        })
    }

    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let (api, name) = self.api_for(gvk, obj).await?;
        let body = serde_json::to_vec(obj)?;
        Ok(api.replace_status(&name, &post_params(), body).await?)
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<(), ClientError> {
        let api = self.api(gvk, key.namespace_opt()).await?;
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Err(ClientError::NotFound { kind: gvk.kind.clone(), key: key.clone() }),
            Err(e) => Err(e.into()),
        }
    }

    async fn watch(&self, gvk: &GroupVersionKind, namespace: Option<&str>, tx: mpsc::Sender<WatchEvent>) -> Result<(), ClientError> {
        let api = self.api(gvk, namespace).await?;
        let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);
        info!(gvk = %gvk_key(gvk), ns = ?namespace, "watcher started");
        while let Some(ev) = stream.next().await {
            let ev = match ev {
                Ok(watcher::Event::Applied(o)) => WatchEvent::Applied(o),
                Ok(watcher::Event::Deleted(o)) => WatchEvent::Deleted(o),
                Ok(watcher::Event::Restarted(list)) => {
                    debug!(count = list.len(), "watch restart");
                    WatchEvent::Restarted(list)
                }
                Err(watcher::Error::InitialListFailed(e) | watcher::Error::WatchStartFailed(e)) if is_terminal(&e) => {
                    error!(gvk = %gvk_key(gvk), error = %e, "watch cannot continue");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(gvk = %gvk_key(gvk), error = %e, "watch error, retrying");
                    continue;
                }
            };
            if tx.send(ev).await.is_err() {
                break;
            }
        }
        debug!(gvk = %gvk_key(gvk), "watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: format!("status {code}"), reason: "Test".into(), code })
    }

    #[test]
    fn denied_or_missing_resources_end_the_watch() {
        assert!(is_terminal(&api_error(403)));
        assert!(is_terminal(&api_error(404)));
        assert!(!is_terminal(&api_error(500)));
        assert!(!is_terminal(&api_error(410)));
    }
}
