//! Runtime-only bookkeeping: which executor is live for which task or epic.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use orch_agents::Executor;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone)]
pub struct LiveExecutor {
    pub run_id: u64,
    pub executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for LiveExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveExecutor")
            .field("run_id", &self.run_id)
            .field("kind", &self.executor.kind())
            .finish()
    }
}

/// At most one live executor per key. Every registration gets a fresh run
/// id so an exit from a replaced run can be told apart from the current one.
#[derive(Debug)]
pub struct ExecutorRegistry<K> {
    live: Mutex<HashMap<K, LiveExecutor>>,
    next_run_id: AtomicU64,
}

impl<K> Default for ExecutorRegistry<K> {
    fn default() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
        }
    }
}

impl<K: Eq + Hash + Clone> ExecutorRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `key`, returning its run id and whatever was
    /// registered before.
    pub fn insert(&self, key: K, executor: Arc<dyn Executor>) -> (u64, Option<LiveExecutor>) {
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .lock()
            .insert(key, LiveExecutor { run_id, executor });
        (run_id, previous)
    }

    pub fn take(&self, key: &K) -> Option<LiveExecutor> {
        self.lock().remove(key)
    }

    /// Deregister `key` only if `run_id` is still the current run.
    pub fn remove_run(&self, key: &K, run_id: u64) -> bool {
        let mut live = self.lock();
        match live.get(key) {
            Some(current) if current.run_id == run_id => {
                live.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn is_current(&self, key: &K, run_id: u64) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|current| current.run_id == run_id)
    }

    pub fn get(&self, key: &K) -> Option<LiveExecutor> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn drain(&self) -> Vec<(K, LiveExecutor)> {
        self.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, LiveExecutor>> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One async mutex per key; operations on the same task run one at a time
/// while different tasks proceed independently.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Forget the lock for a deleted key.
    pub fn forget(&self, key: &K) {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }
}
