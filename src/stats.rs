//! Lock manager statistics.
//!
//! Counters are best-effort: a stats sink may drop, aggregate, or ignore
//! updates, and nothing about granting correctness may depend on them.

use crate::types::LockLevel;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Best-effort counter sink for lock activity.
pub trait StatsSink: Send + Sync {
    fn requested(&self, level: LockLevel);
    fn awarded(&self, level: LockLevel);
    fn rejected(&self);
    fn released(&self);
    fn waited(&self);
    fn notified(&self, woken: usize);
    fn wait_timed_out(&self);
    /// Depth of the pending segment ahead of a newly accepted request.
    fn queue_depth(&self, ahead: usize);
    fn hopped(&self);
    fn reestablished(&self);
    fn cleared(&self, removed: usize);
}

/// Stats sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn requested(&self, _level: LockLevel) {}
    fn awarded(&self, _level: LockLevel) {}
    fn rejected(&self) {}
    fn released(&self) {}
    fn waited(&self) {}
    fn notified(&self, _woken: usize) {}
    fn wait_timed_out(&self) {}
    fn queue_depth(&self, _ahead: usize) {}
    fn hopped(&self) {}
    fn reestablished(&self) {}
    fn cleared(&self, _removed: usize) {}
}

/// In-process counters, also published as Prometheus metrics.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    requested: AtomicU64,
    awarded: AtomicU64,
    rejected: AtomicU64,
    released: AtomicU64,
    waits: AtomicU64,
    notifies: AtomicU64,
    wait_timeouts: AtomicU64,
    contention: AtomicU64,
    hops: AtomicU64,
    reestablished: AtomicU64,
    cleared: AtomicU64,
}

/// Public statistics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockStats {
    /// Lock requests received (lock + try-lock).
    pub requested: u64,
    /// Awards issued.
    pub awarded: u64,
    /// Try-lock rejections issued.
    pub rejected: u64,
    /// Holders released via unlock.
    pub released: u64,
    /// wait() suspensions.
    pub waits: u64,
    /// Waiters woken by notify.
    pub notifies: u64,
    /// Timed waits that elapsed.
    pub wait_timeouts: u64,
    /// Requests that arrived behind at least one pending request.
    pub contention: u64,
    /// Greedy recall hops. Always zero under the non-greedy policy.
    pub hops: u64,
    /// Entries reinstalled by state replay.
    pub reestablished: u64,
    /// Entries dropped by disconnect cleanup.
    pub cleared: u64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LockStats {
        LockStats {
            requested: self.requested.load(Ordering::Relaxed),
            awarded: self.awarded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            notifies: self.notifies.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            contention: self.contention.load(Ordering::Relaxed),
            hops: self.hops.load(Ordering::Relaxed),
            reestablished: self.reestablished.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
        }
    }
}

impl StatsSink for RuntimeStats {
    fn requested(&self, level: LockLevel) {
        self.requested.fetch_add(1, Ordering::Relaxed);
        counter!("warden_locks_requested_total", "level" => level.to_string()).increment(1);
    }

    fn awarded(&self, level: LockLevel) {
        self.awarded.fetch_add(1, Ordering::Relaxed);
        counter!("warden_locks_awarded_total", "level" => level.to_string()).increment(1);
    }

    fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("warden_locks_rejected_total").increment(1);
    }

    fn released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
        counter!("warden_locks_released_total").increment(1);
    }

    fn waited(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
        counter!("warden_lock_waits_total").increment(1);
    }

    fn notified(&self, woken: usize) {
        self.notifies.fetch_add(woken as u64, Ordering::Relaxed);
        counter!("warden_lock_notifies_total").increment(woken as u64);
    }

    fn wait_timed_out(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
        counter!("warden_lock_wait_timeouts_total").increment(1);
    }

    fn queue_depth(&self, ahead: usize) {
        if ahead > 0 {
            self.contention.fetch_add(1, Ordering::Relaxed);
        }
        histogram!("warden_lock_queue_depth").record(ahead as f64);
    }

    fn hopped(&self) {
        self.hops.fetch_add(1, Ordering::Relaxed);
        counter!("warden_lock_hops_total").increment(1);
    }

    fn reestablished(&self) {
        self.reestablished.fetch_add(1, Ordering::Relaxed);
        counter!("warden_locks_reestablished_total").increment(1);
    }

    fn cleared(&self, removed: usize) {
        self.cleared.fetch_add(removed as u64, Ordering::Relaxed);
        counter!("warden_locks_cleared_total").increment(removed as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counts() {
        let stats = RuntimeStats::new();
        stats.requested(LockLevel::Shared);
        stats.requested(LockLevel::Exclusive);
        stats.awarded(LockLevel::Shared);
        stats.rejected();
        stats.notified(3);
        stats.cleared(2);
        stats.queue_depth(0);
        stats.queue_depth(2);

        let snap = stats.snapshot();
        assert_eq!(snap.requested, 2);
        assert_eq!(snap.awarded, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.notifies, 3);
        assert_eq!(snap.cleared, 2);
        assert_eq!(snap.contention, 1);
        assert_eq!(snap.hops, 0);
    }
}
