//! Per-GVK sync controller: watches both clusters, queues virtual keys and
//! reconciles them one key at a time.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vkube_core::{gvk_key, NamespacedName};
use vkube_translate::owner_of;

use crate::client::WatchEvent;
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::locker::KeyLocker;
use crate::queue::{Backoff, WorkQueue};
use crate::syncers::{delete_host_object, Syncer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Neither side exists, or only an unmanaged host object does.
    Noop,
    Created,
    Updated,
    Unchanged,
    Deleted,
    /// The stale host object was removed; reconcile again to recreate it.
    Requeue,
}

pub struct SyncController {
    ctx: SyncContext,
    syncer: Arc<dyn Syncer>,
    locker: KeyLocker<NamespacedName>,
    queue: WorkQueue<NamespacedName>,
}

impl SyncController {
    pub fn new(ctx: SyncContext, syncer: Arc<dyn Syncer>, backoff: Backoff) -> Self {
        Self { ctx, syncer, locker: KeyLocker::new(), queue: WorkQueue::new(backoff) }
    }

    pub fn name(&self) -> &str { self.syncer.name() }
    pub fn queue(&self) -> &WorkQueue<NamespacedName> { &self.queue }

    /// Reconcile one virtual key. Reads both clusters fresh; the event that
    /// queued the key is never trusted.
    pub async fn reconcile(&self, key: &NamespacedName) -> Result<Outcome, SyncError> {
        let t0 = Instant::now();
        counter!("sync_reconcile_total", 1u64);
        let res = {
            let _guard = self.locker.lock(key.clone()).await;
            self.reconcile_locked(key).await
        };
        histogram!("sync_reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(outcome) => debug!(syncer = %self.name(), key = %key, ?outcome, "reconciled"),
            Err(e) => {
                counter!("sync_reconcile_err", 1u64);
                if e.is_conflict() {
                    counter!("sync_conflict_total", 1u64);
                }
            }
        }
        res
    }

    async fn reconcile_locked(&self, key: &NamespacedName) -> Result<Outcome, SyncError> {
        let ctx = &self.ctx;
        let gvk = self.syncer.gvk();
        let mapper = ctx.registry.by_gvk(&gvk)?;

        let v_obj = ctx.get_virtual(&gvk, key).await?;
        let host_key = mapper.virtual_to_host(key, v_obj.as_ref());
        let p_obj = if host_key.is_empty() { None } else { ctx.get_host(&gvk, &host_key).await? };

        // A host object only counts when its ownership record names this key.
        let owned = match p_obj {
            Some(p) => match owner_of(&p) {
                Some(owner) if owner.claims(key, &gvk) => Some((p, owner)),
                _ if v_obj.is_some() => return Err(SyncError::Conflict { virtual_key: key.clone(), host_key }),
                _ => {
                    debug!(key = %key, host_key = %host_key, "unmanaged host object left alone");
                    None
                }
            },
            None => None,
        };

        match (v_obj, owned) {
            (None, None) => Ok(Outcome::Noop),
            (Some(v), None) => {
                self.syncer.sync_to_host(ctx, &v).await?;
                Ok(Outcome::Created)
            }
            (Some(v), Some((p, owner))) => {
                if !owner.same_incarnation(&v) {
                    delete_host_object(ctx, &gvk, &p, "virtual object was recreated").await?;
                    return Ok(Outcome::Requeue);
                }
                Ok(if self.syncer.sync(ctx, &p, &v).await? { Outcome::Updated } else { Outcome::Unchanged })
            }
            (None, Some((p, _))) => {
                self.syncer.sync_to_virtual(ctx, &p).await?;
                Ok(Outcome::Deleted)
            }
        }
    }

    /// Watch both clusters and reconcile with `workers` parallel workers until
    /// `shutdown` fires (`Ok`) or a fatal error stops the controller (`Err`).
    pub async fn run(self: Arc<Self>, workers: usize, shutdown: CancellationToken) -> Result<(), SyncError> {
        let gvk = self.syncer.gvk();
        let stop = self.ctx.cancel.clone();
        let workers = workers.max(1);
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<SyncError>(workers + 2);

        let watches = vec![self.spawn_virtual_watch(fatal_tx.clone()), self.spawn_host_watch(fatal_tx.clone())];
        let pool: Vec<JoinHandle<()>> = (0..workers).map(|id| tokio::spawn(self.clone().worker(id, fatal_tx.clone()))).collect();
        drop(fatal_tx);
        info!(syncer = %self.name(), gvk = %gvk_key(&gvk), workers, "controller started");

        let res = tokio::select! {
            _ = shutdown.cancelled() => Ok(()),
            _ = stop.cancelled() => Ok(()),
            Some(err) = fatal_rx.recv() => {
                error!(syncer = %self.name(), error = %err, "fatal error, stopping controller");
                Err(err)
            }
            else => Ok(()),
        };

        stop.cancel();
        self.queue.shut_down();
        for w in watches {
            w.abort();
        }
        for w in pool {
            let _ = w.await;
        }
        info!(syncer = %self.name(), "controller stopped");
        res
    }

    async fn worker(self: Arc<Self>, id: usize, fatal: mpsc::Sender<SyncError>) {
        while let Some(key) = self.queue.get().await {
            match self.reconcile(&key).await {
                Ok(Outcome::Requeue) => self.queue.add_rate_limited(key.clone()),
                Ok(_) => self.queue.forget(&key),
                Err(e) if e.is_fatal() => {
                    self.queue.done(&key);
                    let _ = fatal.send(e).await;
                    return;
                }
                Err(SyncError::Cancelled) => {
                    self.queue.done(&key);
                    return;
                }
                Err(e) => {
                    warn!(syncer = %self.name(), worker = id, key = %key, error = %e, "reconcile failed, requeueing");
                    self.queue.add_rate_limited(key.clone());
                }
            }
            self.queue.done(&key);
        }
    }

    fn spawn_virtual_watch(self: &Arc<Self>, fatal: mpsc::Sender<SyncError>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let gvk = this.syncer.gvk();
            let (tx, mut rx) = mpsc::channel::<WatchEvent>(256);
            let pump = async {
                while let Some(ev) = rx.recv().await {
                    for o in ev.objects() {
                        this.queue.add(NamespacedName::of(o));
                    }
                }
            };
            let (watched, ()) = tokio::join!(this.ctx.virtual_client.watch(&gvk, None, tx), pump);
            if let Err(e) = watched {
                warn!(syncer = %this.name(), error = %e, "virtual watch failed");
                let _ = fatal.send(e.into()).await;
            }
        })
    }

    /// Host events are mapped back to their virtual key; unmanaged objects are ignored.
    fn spawn_host_watch(self: &Arc<Self>, fatal: mpsc::Sender<SyncError>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let gvk = this.syncer.gvk();
            let (tx, mut rx) = mpsc::channel::<WatchEvent>(256);
            let pump = async {
                while let Some(ev) = rx.recv().await {
                    for o in ev.objects() {
                        match this.ctx.registry.host_to_virtual(&gvk, o) {
                            Ok(key) if !key.is_empty() => this.queue.add(key),
                            Ok(_) => {}
                            Err(e) => {
                                warn!(syncer = %this.name(), error = %e, "host event cannot be mapped");
                                // run() aborts this task, watch included
                                let _ = fatal.send(e.into()).await;
                                return;
                            }
                        }
                    }
                }
            };
            let (watched, ()) = tokio::join!(this.ctx.host_client.watch(&gvk, None, tx), pump);
            if let Err(e) = watched {
                warn!(syncer = %this.name(), error = %e, "host watch failed");
                let _ = fatal.send(e.into()).await;
            }
        })
    }
}
