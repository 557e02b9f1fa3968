//! Deduplicating keyed work queue with per-key exponential backoff.
//!
//! A key is queued at most once. While a worker processes a key, new adds
//! only mark it dirty; `done` re-queues it so the worker sees the newest
//! state without two workers holding the same key.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::counter;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self { Self { base: Duration::from_millis(5), max: Duration::from_secs(1000) } }
}

impl Backoff {
    /// `base * 2^failures`, capped at `max`.
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }
}

struct State<K> {
    order: VecDeque<K>,
    dirty: FxHashSet<K>,
    processing: FxHashSet<K>,
    failures: FxHashMap<K, u32>,
    shutdown: bool,
}

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: Backoff,
}

pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<K: Hash + Eq + Clone + Send + Sync + 'static> WorkQueue<K> {
    pub fn new(backoff: Backoff) -> Self {
        let state = State { order: VecDeque::new(), dirty: FxHashSet::default(), processing: FxHashSet::default(), failures: FxHashMap::default(), shutdown: false };
        Self { inner: Arc::new(Inner { state: Mutex::new(state), notify: Notify::new(), backoff }) }
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> { self.inner.state.lock().unwrap_or_else(|p| p.into_inner()) }

    pub fn add(&self, key: K) {
        let mut st = self.lock();
        if st.shutdown || !st.dirty.insert(key.clone()) {
            return;
        }
        if !st.processing.contains(&key) {
            st.order.push_back(key);
            drop(st);
            self.inner.notify.notify_one();
        }
    }

    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        let q = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            q.add(key);
        });
    }

    /// Re-add after the key's backoff delay and bump its failure count.
    pub fn add_rate_limited(&self, key: K) {
        let failures = {
            let mut st = self.lock();
            let n = st.failures.entry(key.clone()).or_insert(0);
            let current = *n;
            *n = n.saturating_add(1);
            current
        };
        counter!("sync_queue_requeue_total", 1u64);
        self.add_after(key, self.inner.backoff.delay(failures));
    }

    /// Reset the backoff of `key`.
    pub fn forget(&self, key: &K) { self.lock().failures.remove(key); }

    pub fn failures(&self, key: &K) -> u32 { self.lock().failures.get(key).copied().unwrap_or(0) }

    /// Wait for the next key. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.lock();
                if st.shutdown {
                    return None;
                }
                if let Some(key) = st.order.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark `key` finished; queue it again if it was added meanwhile.
    pub fn done(&self, key: &K) {
        let mut st = self.lock();
        st.processing.remove(key);
        if st.dirty.contains(key) && !st.shutdown {
            st.order.push_back(key.clone());
            drop(st);
            self.inner.notify.notify_one();
        }
    }

    pub fn shut_down(&self) {
        self.lock().shutdown = true;
        self.inner.notify.notify_waiters();
    }

    pub fn len(&self) -> usize { self.lock().order.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let b = Backoff { base: Duration::from_millis(5), max: Duration::from_millis(100) };
        assert_eq!(b.delay(0), Duration::from_millis(5));
        assert_eq!(b.delay(2), Duration::from_millis(20));
        assert_eq!(b.delay(10), Duration::from_millis(100));
        assert_eq!(b.delay(u32::MAX), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn duplicates_collapse() {
        let q = WorkQueue::new(Backoff::default());
        q.add("a");
        q.add("a");
        q.add("b");
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, Some("b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn adds_while_processing_are_deferred_to_done() {
        let q = WorkQueue::new(Backoff::default());
        q.add("a");
        let k = q.get().await.unwrap();
        q.add("a");
        assert!(q.is_empty());
        q.done(&k);
        assert_eq!(q.get().await, Some("a"));
    }

    #[tokio::test]
    async fn rate_limited_requeue_counts_failures() {
        let q = WorkQueue::new(Backoff { base: Duration::from_millis(1), max: Duration::from_millis(10) });
        q.add_rate_limited("a");
        q.add_rate_limited("a");
        assert_eq!(q.failures(&"a"), 2);
        let got = tokio::time::timeout(Duration::from_secs(1), q.get()).await.unwrap();
        assert_eq!(got, Some("a"));
        q.forget(&"a");
        assert_eq!(q.failures(&"a"), 0);
    }

    #[tokio::test]
    async fn shutdown_wakes_waiters() {
        let q: WorkQueue<&'static str> = WorkQueue::new(Backoff::default());
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down();
        assert_eq!(waiter.await.unwrap(), None);
    }
}
