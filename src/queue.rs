//! Ordered grant queue for a single lock.
//!
//! The queue is partitioned, front to back, into three contiguous segments:
//! holders, then pending/try-pending requests in arrival order, then waiters
//! in arrival order. Every operation preserves that partitioning; it is the
//! basis for the fairness and exclusivity guarantees upstream.
//!
//! Award scans never look past the first waiter: once something is waiting,
//! later-arriving requests queue behind it but cannot leapfrog it for
//! granting purposes.

use crate::context::LockContext;
use crate::types::{ClientId, LockLevel, LockOwner};
use std::collections::VecDeque;

/// Ordered collection of [`LockContext`] entries for one lock.
#[derive(Debug, Default)]
pub struct GrantQueue {
    entries: VecDeque<LockContext>,
}

impl GrantQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LockContext> {
        self.entries.iter()
    }

    /// Insert a granted entry at the front of the holder segment.
    pub fn push_holder(&mut self, ctx: LockContext) {
        debug_assert!(ctx.state().is_holder());
        self.entries.push_front(ctx);
        debug_assert!(self.is_segment_ordered());
    }

    /// Insert a pending/try-pending entry at the end of the pending segment,
    /// immediately before the first waiter if one exists.
    pub fn push_queued(&mut self, ctx: LockContext) {
        debug_assert!(ctx.state().is_queued());
        let at = self.first_waiter_index().unwrap_or(self.entries.len());
        self.entries.insert(at, ctx);
        debug_assert!(self.is_segment_ordered());
    }

    /// Append a waiter at the tail.
    pub fn push_waiter(&mut self, ctx: LockContext) {
        debug_assert!(ctx.state().is_waiter());
        self.entries.push_back(ctx);
        debug_assert!(self.is_segment_ordered());
    }

    /// First entry for `owner`, in any state.
    pub fn find(&self, owner: LockOwner) -> Option<&LockContext> {
        self.entries.iter().find(|c| c.owner() == owner)
    }

    /// Remove and return the first entry for `owner` matching `pred`.
    pub fn remove_where(
        &mut self,
        owner: LockOwner,
        pred: impl Fn(&LockContext) -> bool,
    ) -> Option<LockContext> {
        let at = self
            .entries
            .iter()
            .position(|c| c.owner() == owner && pred(c))?;
        self.entries.remove(at)
    }

    /// Remove every entry belonging to `client`, in queue order.
    pub fn remove_client(&mut self, client: ClientId) -> Vec<LockContext> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].owner().client == client {
                if let Some(ctx) = self.entries.remove(i) {
                    removed.push(ctx);
                }
            } else {
                i += 1;
            }
        }
        removed
    }

    pub fn has_holders(&self) -> bool {
        self.entries.front().is_some_and(|c| c.state().is_holder())
    }

    /// Level of the current holders, if any. All concurrent holders share a
    /// compatible level, so the first one is authoritative.
    pub fn holder_level(&self) -> Option<LockLevel> {
        self.entries
            .front()
            .filter(|c| c.state().is_holder())
            .map(|c| c.level())
    }

    /// Whether a request at `level` is compatible with the current holders:
    /// shared is awardable when there are no holders or all holders are
    /// shared, exclusive only when there are no holders at all.
    pub fn can_award(&self, level: LockLevel) -> bool {
        match self.holder_level() {
            None => true,
            Some(held) => level.is_shared() && held.is_shared(),
        }
    }

    /// Number of pending/try-pending entries.
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .take_while(|c| !c.state().is_waiter())
            .filter(|c| c.state().is_queued())
            .count()
    }

    /// First entry past the holder segment.
    pub fn first_non_holder(&self) -> Option<&LockContext> {
        self.entries.iter().find(|c| !c.state().is_holder())
    }

    /// Level of the head award candidate: the first non-holder entry, if it
    /// is pending/try-pending. A waiter at that position blocks the scan.
    pub fn head_candidate_level(&self) -> Option<LockLevel> {
        self.first_non_holder()
            .filter(|c| c.state().is_queued())
            .map(|c| c.level())
    }

    /// Remove and return the head award candidate, if any.
    pub fn take_head_candidate(&mut self) -> Option<LockContext> {
        let at = self
            .entries
            .iter()
            .position(|c| !c.state().is_holder())
            .filter(|&i| self.entries[i].state().is_queued())?;
        self.entries.remove(at)
    }

    /// Remove and return every pending/try-pending shared entry before the
    /// first waiter, in arrival order.
    pub fn take_pending_shared(&mut self) -> Vec<LockContext> {
        let mut taken = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            let state = self.entries[i].state();
            if state.is_waiter() {
                break;
            }
            if state.is_queued() && self.entries[i].level().is_shared() {
                if let Some(ctx) = self.entries.remove(i) {
                    taken.push(ctx);
                }
            } else {
                i += 1;
            }
        }
        taken
    }

    /// Remove and return the earliest waiter.
    pub fn take_first_waiter(&mut self) -> Option<LockContext> {
        let at = self.first_waiter_index()?;
        self.entries.remove(at)
    }

    /// Remove and return every waiter, earliest first.
    pub fn take_all_waiters(&mut self) -> Vec<LockContext> {
        match self.first_waiter_index() {
            Some(at) => self.entries.split_off(at).into_iter().collect(),
            None => Vec::new(),
        }
    }

    fn first_waiter_index(&self) -> Option<usize> {
        self.entries.iter().position(|c| c.state().is_waiter())
    }

    /// Verify the three-segment partitioning: holders, then pending entries,
    /// then waiters, with no interleaving.
    pub(crate) fn is_segment_ordered(&self) -> bool {
        let mut seen = 0u8;
        for ctx in &self.entries {
            let segment = if ctx.state().is_holder() {
                0
            } else if ctx.state().is_queued() {
                1
            } else {
                2
            };
            if segment < seen {
                return false;
            }
            seen = segment;
        }
        true
    }
}
