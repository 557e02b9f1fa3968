//! In-memory cluster for tests and dry runs.
//!
//! Objects are keyed by GVK + namespaced name. Every accepted write gets a
//! fresh resourceVersion, creates get a random UID, and watchers receive the
//! same events a real watch would deliver.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;
use uuid::Uuid;
use vkube_core::{gvk_key, DynamicObject, GroupVersionKind, NamespacedName};

use crate::client::{ClusterClient, WatchEvent};
use crate::error::ClientError;

/// Writes accepted by a `FakeCluster`, by verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl WriteCounts {
    pub fn total(&self) -> usize { self.creates + self.updates + self.deletes }
}

type ObjKey = (String, NamespacedName);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjKey, DynamicObject>,
    rv: u64,
    writes: WriteCounts,
}

pub struct FakeCluster {
    name: String,
    state: Mutex<State>,
    events: broadcast::Sender<(String, WatchEvent)>,
}

impl FakeCluster {
    pub fn new(name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self { name: name.into(), state: Mutex::new(State::default()), events }
    }

    pub fn name(&self) -> &str { &self.name }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(|p| p.into_inner()) }

    fn stamp(state: &mut State, obj: &mut DynamicObject, uid: Option<String>) {
        state.rv += 1;
        obj.metadata.resource_version = Some(state.rv.to_string());
        obj.metadata.uid = Some(uid.unwrap_or_else(|| Uuid::new_v4().to_string()));
    }

    fn publish(&self, gvk: &GroupVersionKind, ev: WatchEvent) {
        // no receivers is fine
        let _ = self.events.send((gvk_key(gvk), ev));
    }

    /// Seed an object without counting a write. Keeps a UID if one is set.
    pub fn insert(&self, gvk: &GroupVersionKind, mut obj: DynamicObject) -> DynamicObject {
        {
            let mut st = self.lock();
            let uid = obj.metadata.uid.clone();
            Self::stamp(&mut st, &mut obj, uid);
            st.objects.insert((gvk_key(gvk), NamespacedName::of(&obj)), obj.clone());
        }
        self.publish(gvk, WatchEvent::Applied(obj.clone()));
        obj
    }

    pub fn object(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Option<DynamicObject> {
        self.lock().objects.get(&(gvk_key(gvk), key.clone())).cloned()
    }

    pub fn objects(&self, gvk: &GroupVersionKind) -> Vec<DynamicObject> {
        let k = gvk_key(gvk);
        self.lock().objects.iter().filter(|((g, _), _)| *g == k).map(|(_, o)| o.clone()).collect()
    }

    pub fn writes(&self) -> WriteCounts { self.lock().writes }

    fn store_update(&self, gvk: &GroupVersionKind, mut obj: DynamicObject, status_only: bool) -> Result<DynamicObject, ClientError> {
        let key = NamespacedName::of(&obj);
        let updated = {
            let mut st = self.lock();
            let live = st
                .objects
                .get(&(gvk_key(gvk), key.clone()))
                .cloned()
                .ok_or_else(|| ClientError::NotFound { kind: gvk.kind.clone(), key: key.clone() })?;
            if status_only {
                let mut next = live.clone();
                match obj.data.get("status") {
                    Some(status) => next.data["status"] = status.clone(),
                    None => {
                        if let Some(m) = next.data.as_object_mut() {
                            m.remove("status");
                        }
                    }
                }
                obj = next;
            }
            obj.metadata.creation_timestamp = live.metadata.creation_timestamp.clone();
            Self::stamp(&mut st, &mut obj, live.metadata.uid.clone());
            st.writes.updates += 1;
            st.objects.insert((gvk_key(gvk), key), obj.clone());
            obj
        };
        self.publish(gvk, WatchEvent::Applied(updated.clone()));
        Ok(updated)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<Option<DynamicObject>, ClientError> { Ok(self.object(gvk, key)) }

    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        if obj.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(ClientError::MissingName);
        }
        let key = NamespacedName::of(obj);
        let created = {
            let mut st = self.lock();
            let k = (gvk_key(gvk), key.clone());
            if st.objects.contains_key(&k) {
                return Err(ClientError::AlreadyExists { kind: gvk.kind.clone(), key });
            }
            let mut obj = obj.clone();
            Self::stamp(&mut st, &mut obj, None);
            st.writes.creates += 1;
            st.objects.insert(k, obj.clone());
            obj
        };
        trace!(cluster = %self.name, key = %key, "created");
        self.publish(gvk, WatchEvent::Applied(created.clone()));
        Ok(created)
    }

    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> { self.store_update(gvk, obj.clone(), false) }

    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> { self.store_update(gvk, obj.clone(), true) }

    async fn delete(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<(), ClientError> {
        let removed = {
            let mut st = self.lock();
            let removed = st.objects.remove(&(gvk_key(gvk), key.clone()));
            if removed.is_some() {
                st.writes.deletes += 1;
            }
            removed
        };
        match removed {
            Some(obj) => {
                trace!(cluster = %self.name, key = %key, "deleted");
                self.publish(gvk, WatchEvent::Deleted(obj));
                Ok(())
            }
            None => Err(ClientError::NotFound { kind: gvk.kind.clone(), key: key.clone() }),
        }
    }

    async fn watch(&self, gvk: &GroupVersionKind, namespace: Option<&str>, tx: mpsc::Sender<WatchEvent>) -> Result<(), ClientError> {
        let wanted = gvk_key(gvk);
        let in_scope = |o: &DynamicObject| namespace.map_or(true, |ns| o.metadata.namespace.as_deref() == Some(ns));
        // subscribe before listing so nothing falls between the two
        let mut rx = self.events.subscribe();
        let initial: Vec<_> = self.objects(gvk).into_iter().filter(|o| in_scope(o)).collect();
        if tx.send(WatchEvent::Restarted(initial)).await.is_err() {
            return Ok(());
        }
        loop {
            match rx.recv().await {
                Ok((g, ev)) => {
                    if g != wanted || !ev.objects().iter().all(|o| in_scope(o)) {
                        continue;
                    }
                    if tx.send(ev).await.is_err() {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    trace!(cluster = %self.name, skipped = n, "watch lagged, relisting");
                    let list: Vec<_> = self.objects(gvk).into_iter().filter(|o| in_scope(o)).collect();
                    if tx.send(WatchEvent::Restarted(list)).await.is_err() {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}
