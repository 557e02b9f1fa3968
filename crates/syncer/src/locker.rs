//! Per-key async locks. Entries live only while someone holds or waits on them.

use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyLocker<K> {
    locks: Mutex<FxHashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Hash + Eq + Clone> Default for KeyLocker<K> {
    fn default() -> Self { Self { locks: Mutex::new(FxHashMap::default()) } }
}

/// Held for the duration of one reconcile.
pub struct KeyGuard<'a, K: Hash + Eq + Clone> {
    locker: &'a KeyLocker<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Hash + Eq + Clone> KeyLocker<K> {
    pub fn new() -> Self { Self::default() }

    fn map(&self) -> MutexGuard<'_, FxHashMap<K, Arc<AsyncMutex<()>>>> { self.locks.lock().unwrap_or_else(|p| p.into_inner()) }

    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let m = self.map().entry(key.clone()).or_default().clone();
        let guard = m.lock_owned().await;
        KeyGuard { locker: self, key, guard: Some(guard) }
    }

    /// Keys currently held or waited on.
    pub fn len(&self) -> usize { self.map().len() }
    pub fn is_empty(&self) -> bool { self.map().is_empty() }
}

impl<K: Hash + Eq + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locker.map();
        if map.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&self.key);
        }
    }
}
