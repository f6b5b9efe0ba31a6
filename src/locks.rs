//! Keyed Async Locks
//!
//! Per-key serialization for engine-owned state. Each key maps to its own
//! async mutex, created on first use and dropped again once the last holder
//! or waiter lets go, so the table only grows with the number of keys that
//! are busy right now.
//!
//! Callers that need several keys take them through [`KeyedLocks::lock_all`],
//! which locks in sorted order.

use crate::domain::model::{ClaimKey, ZoneKey};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable<K> = DashMap<K, Arc<Mutex<()>>>;

/// Table of per-key async mutexes
pub struct KeyedLocks<K: Hash + Eq + Clone> {
    table: Arc<LockTable<K>>,
}

impl<K: Hash + Eq + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Arc::new(DashMap::new()),
        }
    }
}

impl<K: Hash + Eq + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`
    ///
    /// Cancelling the returned future while it waits leaves no table entry
    /// behind once the holder is gone.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let mut pending = PendingLock {
            key: Some(key.clone()),
            table: self.table.clone(),
        };
        let mutex = self
            .table
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // The Arc moves into the wait so it is gone before `pending` drops
        let guard = mutex.lock_owned().await;
        pending.key = None;
        KeyedGuard {
            key,
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    /// Acquire several keys in sorted order, skipping duplicates
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = K>) -> Vec<KeyedGuard<K>>
    where
        K: Ord,
    {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of keys currently held or awaited
    pub fn active(&self) -> usize {
        self.table.len()
    }
}

/// Removes an idle table entry if a waiter is dropped before acquiring
struct PendingLock<K: Hash + Eq + Clone> {
    key: Option<K>,
    table: Arc<LockTable<K>>,
}

impl<K: Hash + Eq + Clone> Drop for PendingLock<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.table
                .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

/// Held lock for one key; releases and cleans up on drop
pub struct KeyedGuard<K: Hash + Eq + Clone> {
    key: K,
    table: Arc<LockTable<K>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Hash + Eq + Clone> KeyedGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Hash + Eq + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        // Release before checking so our own Arc is not counted
        self.guard.take();
        self.table
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Locks guarding the engine's own records
///
/// Lock order: the claim first, then zones in sorted order.
#[derive(Default)]
pub struct EngineLocks {
    pub claims: KeyedLocks<ClaimKey>,
    pub zones: KeyedLocks<ZoneKey>,
}

impl EngineLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
