//! vkube syncer: keeps host-cluster objects in step with their virtual
//! counterparts.
//!
//! One `SyncController` runs per synced GVK. It watches both clusters, turns
//! every event into a virtual key and reconciles keys through a rate-limited
//! work queue. Reconciles of the same key never overlap.

#![forbid(unsafe_code)]

pub mod client;
pub mod context;
pub mod controller;
pub mod error;
pub mod fake;
pub mod locker;
pub mod queue;
pub mod syncers;

pub use client::{ClusterClient, KubeCluster, WatchEvent, FIELD_MANAGER};
pub use context::SyncContext;
pub use controller::{Outcome, SyncController};
pub use error::{ClientError, SyncError};
pub use fake::{FakeCluster, WriteCounts};
pub use locker::{KeyGuard, KeyLocker};
pub use queue::{Backoff, WorkQueue};
pub use syncers::{ExportSyncer, GenericSyncer, Syncer};
