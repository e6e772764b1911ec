//! Per-interest lock context.
//!
//! A [`LockContext`] records one client-thread's relationship to one lock:
//! holding it, queued for it, or suspended in wait() on it. Contexts are
//! mutated in place as they move through the state machine — a pending entry
//! is promoted to a holder, a holder becomes a waiter, a notified waiter
//! becomes pending again — and any associated timer is cancelled exactly
//! once along the way.

use crate::timer::TimerHandle;
use crate::types::{EntryState, LockEntrySnapshot, LockLevel, LockOwner};
use std::time::{Duration, Instant};

/// One client-thread's interest in one lock.
#[derive(Debug)]
pub struct LockContext {
    owner: LockOwner,
    level: LockLevel,
    state: EntryState,
    /// Requested timeout for timed states, kept for introspection.
    timeout: Option<Duration>,
    /// Absolute deadline for timed states.
    deadline: Option<Instant>,
    timer: Option<TimerHandle>,
}

impl LockContext {
    /// A currently granted entry.
    pub fn holder(owner: LockOwner, level: LockLevel) -> Self {
        Self::new(owner, level, EntryState::Holder, None, None)
    }

    /// A client-side cached grant. Never created by the non-greedy policy,
    /// but representable for state replay and introspection.
    pub fn greedy_holder(owner: LockOwner, level: LockLevel) -> Self {
        Self::new(owner, level, EntryState::GreedyHolder, None, None)
    }

    /// A queued request with no deadline.
    pub fn pending(owner: LockOwner, level: LockLevel) -> Self {
        Self::new(owner, level, EntryState::Pending, None, None)
    }

    /// A queued request that gives up after `timeout`.
    pub fn try_pending(
        owner: LockOwner,
        level: LockLevel,
        timeout: Duration,
        timer: Option<TimerHandle>,
    ) -> Self {
        Self::new(owner, level, EntryState::TryPending, Some(timeout), timer)
    }

    /// A former holder suspended via wait(), optionally timed.
    pub fn waiter(
        owner: LockOwner,
        level: LockLevel,
        timeout: Option<Duration>,
        timer: Option<TimerHandle>,
    ) -> Self {
        Self::new(owner, level, EntryState::Waiter, timeout, timer)
    }

    fn new(
        owner: LockOwner,
        level: LockLevel,
        state: EntryState,
        timeout: Option<Duration>,
        timer: Option<TimerHandle>,
    ) -> Self {
        Self {
            owner,
            level,
            state,
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            timer,
        }
    }

    pub fn owner(&self) -> LockOwner {
        self.owner
    }

    pub fn level(&self) -> LockLevel {
        self.level
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Promote a queued entry to holder. Cancels any pending timeout.
    pub fn award(&mut self) {
        debug_assert!(self.state.is_queued());
        self.cancel_timer();
        self.state = EntryState::Holder;
        self.timeout = None;
        self.deadline = None;
    }

    /// Convert a waiter or try-pending entry back to plain pending
    /// (notify, interrupt). Cancels any pending timeout.
    pub fn to_pending(&mut self) {
        self.cancel_timer();
        self.state = EntryState::Pending;
        self.timeout = None;
        self.deadline = None;
    }

    /// Cancel the associated timeout, if any. Idempotent.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Remaining time before the deadline, if this entry has one.
    pub fn remaining_timeout(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Introspection view of this entry.
    pub fn snapshot(&self) -> LockEntrySnapshot {
        LockEntrySnapshot {
            owner: self.owner,
            level: self.level,
            state: self.state,
            remaining_timeout_ms: self.remaining_timeout().map(|d| d.as_millis() as u64),
        }
    }
}

impl Drop for LockContext {
    fn drop(&mut self) {
        // Removal is one of the cancellation points; cancel() is idempotent
        // so this is safe even after award or fire.
        self.cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> LockOwner {
        LockOwner::new(1, 1)
    }

    #[test]
    fn award_promotes_and_clears_deadline() {
        let handle = TimerHandle::inert();
        let mut ctx = LockContext::try_pending(
            owner(),
            LockLevel::Exclusive,
            Duration::from_millis(100),
            Some(handle.clone()),
        );
        assert_eq!(ctx.state(), EntryState::TryPending);
        assert!(ctx.remaining_timeout().is_some());

        ctx.award();
        assert_eq!(ctx.state(), EntryState::Holder);
        assert!(ctx.remaining_timeout().is_none());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn waiter_to_pending_cancels_timer() {
        let handle = TimerHandle::inert();
        let mut ctx = LockContext::waiter(
            owner(),
            LockLevel::Exclusive,
            Some(Duration::from_secs(1)),
            Some(handle.clone()),
        );
        ctx.to_pending();
        assert_eq!(ctx.state(), EntryState::Pending);
        assert!(handle.is_cancelled());

        // Second cancellation point must be safe.
        ctx.cancel_timer();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn drop_cancels_timer() {
        let handle = TimerHandle::inert();
        {
            let _ctx = LockContext::try_pending(
                owner(),
                LockLevel::Shared,
                Duration::from_secs(1),
                Some(handle.clone()),
            );
        }
        assert!(handle.is_cancelled());
    }

    #[test]
    fn snapshot_reports_state() {
        let ctx = LockContext::holder(owner(), LockLevel::Shared);
        let snap = ctx.snapshot();
        assert_eq!(snap.state, EntryState::Holder);
        assert_eq!(snap.level, LockLevel::Shared);
        assert_eq!(snap.remaining_timeout_ms, None);
    }
}
