//! Lock table garbage-collection boundary.
//!
//! Lock records live in a table owned by the dispatch stage, created on
//! first interest and destroyed when their queue empties. The engine never
//! touches that table directly; it signals "this lock's queue is empty"
//! through [`LockStore::remove`], and the owner reclaims the record at a
//! safe point.

use crate::types::LockId;
use std::collections::HashSet;

/// Receives remove-if-empty signals from engines.
pub trait LockStore: Send + Sync {
    /// Mark `lock` as eligible for removal from the lock table. The queue
    /// for `lock` is empty at the time of the call; the owner must still
    /// re-check before discarding, since a new request may land in between.
    fn remove(&self, lock: &LockId);
}

/// Shard-local reap set: engines mark locks during command processing and
/// the shard drains the set after each command.
#[derive(Default)]
pub struct ReapSet {
    inner: parking_lot::Mutex<HashSet<LockId>>,
}

impl ReapSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return all marked locks.
    pub fn drain(&self) -> Vec<LockId> {
        self.inner.lock().drain().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl LockStore for ReapSet {
    fn remove(&self, lock: &LockId) {
        self.inner.lock().insert(lock.clone());
    }
}

/// Store that ignores removal signals. Useful when the embedder manages
/// lock lifecycle entirely by itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

impl LockStore for NoopStore {
    fn remove(&self, _lock: &LockId) {}
}
