//! Per-lock grant engine.
//!
//! A [`GrantEngine`] owns the grant queue for one lock identity and
//! implements the full public contract: lock, try-lock, unlock, wait,
//! notify, interrupt, timeout delivery, state replay, disconnect cleanup,
//! and introspection. On every mutating event it asks its
//! [`GrantPolicy`](crate::policy::GrantPolicy) which queued entries become
//! holders, promotes them, and pushes the award responses into the
//! [`LockSink`](crate::sink::LockSink).
//!
//! # Concurrency
//!
//! An engine is **not** internally thread-safe. It assumes single-writer
//! access, serialized by the surrounding dispatch stage (see
//! [`service`](crate::service)): only one logical actor ever mutates a given
//! queue, so the ordering and exclusivity invariants hold by construction.
//! Timer fires are delivered through the same serialized channel as ordinary
//! requests, never from the timer's own task; a fire racing with an award or
//! notify shows up here as "entry no longer present" and is a normal no-op.

use crate::context::LockContext;
use crate::error::{Result, WardenError};
use crate::policy::GrantPolicy;
use crate::queue::GrantQueue;
use crate::sink::{LockResponse, LockSink, ResponseEvent};
use crate::stats::StatsSink;
use crate::store::LockStore;
use crate::timer::{LockTimer, TimerFire};
use crate::types::{
    ClientId, EntryState, LockId, LockLevel, LockOwner, LockSnapshot, NotifyAction,
    ReestablishedLock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Grant engine for a single lock.
pub struct GrantEngine {
    lock_id: LockId,
    queue: GrantQueue,
    policy: Arc<dyn GrantPolicy>,
    sink: Arc<dyn LockSink>,
    timer: Arc<dyn LockTimer>,
    stats: Arc<dyn StatsSink>,
    store: Arc<dyn LockStore>,
}

impl GrantEngine {
    pub fn new(
        lock_id: LockId,
        policy: Arc<dyn GrantPolicy>,
        sink: Arc<dyn LockSink>,
        timer: Arc<dyn LockTimer>,
        stats: Arc<dyn StatsSink>,
        store: Arc<dyn LockStore>,
    ) -> Self {
        Self {
            lock_id,
            queue: GrantQueue::new(),
            policy,
            sink,
            timer,
            stats,
            store,
        }
    }

    pub fn lock_id(&self) -> &LockId {
        &self.lock_id
    }

    /// Whether the queue holds no interests at all. An empty engine is
    /// eligible for removal from the lock table.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Request the lock, queueing until it can be granted. The response
    /// arrives asynchronously through the sink once awarded.
    pub fn lock(&mut self, owner: LockOwner, level: LockLevel) -> Result<()> {
        self.validate_request(owner, level)?;
        self.stats.requested(level);
        self.stats.queue_depth(self.queue.pending_count());
        debug!(lock = %self.lock_id, %owner, %level, "lock requested");

        self.queue.push_queued(LockContext::pending(owner, level));
        self.award_all_possible();
        Ok(())
    }

    /// Request the lock with a deadline. A zero `timeout` means "only if
    /// immediately awardable": the reject is emitted synchronously and
    /// nothing stays queued. A positive timeout queues the request with a
    /// scheduled timer.
    pub fn try_lock(&mut self, owner: LockOwner, level: LockLevel, timeout: Duration) -> Result<()> {
        self.validate_request(owner, level)?;
        self.stats.requested(level);
        self.stats.queue_depth(self.queue.pending_count());
        debug!(lock = %self.lock_id, %owner, %level, ?timeout, "try-lock requested");

        if timeout.is_zero() {
            self.queue
                .push_queued(LockContext::try_pending(owner, level, timeout, None));
            self.award_all_possible();
            // Not awarded means not awardable now: take it back out and
            // reject, leaving the queue exactly as it was.
            if self
                .queue
                .remove_where(owner, |c| c.state().is_queued())
                .is_some()
            {
                self.reject(owner, level);
            }
            return Ok(());
        }

        let handle = self.timer.schedule(
            timeout,
            TimerFire {
                lock: self.lock_id.clone(),
                owner,
            },
        );
        self.queue
            .push_queued(LockContext::try_pending(owner, level, timeout, Some(handle)));
        self.award_all_possible();
        Ok(())
    }

    /// Release a held lock. Unlock of a non-holder is deliberately a silent
    /// no-op: a client-initiated unlock can legitimately cross an in-flight
    /// greedy award on the wire.
    pub fn unlock(&mut self, owner: LockOwner) -> Result<()> {
        match self.queue.remove_where(owner, |c| c.state().is_holder()) {
            None => {
                debug!(lock = %self.lock_id, %owner, "unlock for non-holder ignored");
                return Ok(());
            }
            Some(ctx) => {
                self.stats.released();
                debug!(lock = %self.lock_id, %owner, level = %ctx.level(), "lock released");
            }
        }

        if self.queue.is_empty() {
            self.store.remove(&self.lock_id);
        } else {
            self.award_all_possible();
        }
        Ok(())
    }

    /// Suspend an exclusive holder until notify, interrupt, or timeout.
    /// `None` waits indefinitely. Fails with [`WardenError::NotLockHolder`]
    /// if the caller does not hold the lock exclusively.
    pub fn wait(&mut self, owner: LockOwner, timeout: Option<Duration>) -> Result<()> {
        let holder = self
            .queue
            .remove_where(owner, |c| c.state().is_holder() && c.level().is_exclusive());
        let Some(ctx) = holder else {
            return Err(WardenError::NotLockHolder {
                lock: self.lock_id.clone(),
                owner,
            });
        };
        drop(ctx);

        let timer = timeout.map(|t| {
            self.timer.schedule(
                t,
                TimerFire {
                    lock: self.lock_id.clone(),
                    owner,
                },
            )
        });
        self.queue
            .push_waiter(LockContext::waiter(owner, LockLevel::Exclusive, timeout, timer));
        self.stats.waited();
        debug!(lock = %self.lock_id, %owner, ?timeout, "holder suspended in wait");

        // Releasing the hold may unblock queued requests.
        self.award_all_possible();
        Ok(())
    }

    /// Wake one or all waiters, converting them back to pending requests.
    /// Returns the woken (client, thread) pairs. The actual re-award happens
    /// when the notifying holder unlocks, not here.
    pub fn notify(&mut self, owner: LockOwner, action: NotifyAction) -> Result<Vec<LockOwner>> {
        let holds_exclusive = self
            .queue
            .find(owner)
            .map(|c| c.state().is_holder() && c.level().is_exclusive())
            .unwrap_or(false);
        if !holds_exclusive {
            return Err(WardenError::NotLockHolder {
                lock: self.lock_id.clone(),
                owner,
            });
        }

        let taken = match action {
            NotifyAction::One => self.queue.take_first_waiter().into_iter().collect(),
            NotifyAction::All => self.queue.take_all_waiters(),
        };

        let mut woken = Vec::with_capacity(taken.len());
        for mut ctx in taken {
            ctx.to_pending();
            woken.push(ctx.owner());
            self.queue.push_queued(ctx);
        }
        self.stats.notified(woken.len());
        debug!(lock = %self.lock_id, %owner, woken = woken.len(), "waiters notified");
        Ok(woken)
    }

    /// Interrupt a waiter, converting it back to a pending request. An
    /// absent waiter is logged and ignored.
    pub fn interrupt(&mut self, owner: LockOwner) -> Result<()> {
        match self.queue.remove_where(owner, |c| c.state().is_waiter()) {
            None => {
                warn!(lock = %self.lock_id, %owner, "interrupt for absent waiter ignored");
                Ok(())
            }
            Some(mut ctx) => {
                ctx.to_pending();
                self.queue.push_queued(ctx);
                self.award_all_possible();
                Ok(())
            }
        }
    }

    /// Deliver an elapsed deadline for `owner`. Fires that lost a race with
    /// an award, notify, or removal find no timed entry and are no-ops.
    pub fn timer_timeout(&mut self, owner: LockOwner) -> Result<()> {
        let state = match self.queue.find(owner) {
            None => {
                debug!(lock = %self.lock_id, %owner, "stale timer fire ignored");
                return Ok(());
            }
            Some(ctx) => ctx.state(),
        };

        match state {
            EntryState::TryPending => {
                let removed = self
                    .queue
                    .remove_where(owner, |c| c.state() == EntryState::TryPending);
                if let Some(ctx) = removed {
                    let level = ctx.level();
                    drop(ctx);
                    self.reject(owner, level);
                    if self.queue.is_empty() {
                        self.store.remove(&self.lock_id);
                    } else {
                        // Dropping an exclusive head candidate can make a
                        // later shared request awardable.
                        self.award_all_possible();
                    }
                }
                Ok(())
            }
            EntryState::Waiter => {
                let removed = self.queue.remove_where(owner, |c| c.state().is_waiter());
                drop(removed);
                self.stats.wait_timed_out();
                self.sink.push(ResponseEvent::new(LockResponse::WaitTimedOut {
                    lock: self.lock_id.clone(),
                    owner,
                }));
                debug!(lock = %self.lock_id, %owner, "wait timed out, re-acquiring");
                // A timed-out waiter unconditionally re-acquires exclusively,
                // mirroring blocking wait-then-reacquire semantics.
                self.lock(owner, LockLevel::Exclusive)
            }
            other => {
                debug!(lock = %self.lock_id, %owner, state = ?other, "timer fire for untimed entry ignored");
                Ok(())
            }
        }
    }

    /// Read-only view: current holders and waiters plus the pending count.
    pub fn query(&self) -> LockSnapshot {
        LockSnapshot {
            lock: self.lock_id.clone(),
            entries: self
                .queue
                .iter()
                .filter(|c| !c.state().is_queued())
                .map(|c| c.snapshot())
                .collect(),
            pending: self.queue.pending_count(),
        }
    }

    /// Replay a client's previously granted or waiting state after a
    /// reconnect. Replayed holders are installed directly, without the award
    /// path and without a response: the client already knows it holds the
    /// lock. Conflicting or duplicate replays indicate client/server desync
    /// and fail fatally.
    pub fn reestablish(&mut self, entry: &ReestablishedLock) -> Result<()> {
        if self.queue.find(entry.owner).is_some() {
            return Err(WardenError::ReestablishConflict {
                lock: self.lock_id.clone(),
                reason: format!("{} replayed twice", entry.owner),
            });
        }

        match entry.state {
            EntryState::Holder | EntryState::GreedyHolder => {
                if !self.queue.can_award(entry.level) {
                    return Err(WardenError::ReestablishConflict {
                        lock: self.lock_id.clone(),
                        reason: format!(
                            "{} replayed a {} hold against a conflicting holder",
                            entry.owner, entry.level
                        ),
                    });
                }
                let ctx = if entry.state == EntryState::GreedyHolder {
                    LockContext::greedy_holder(entry.owner, entry.level)
                } else {
                    LockContext::holder(entry.owner, entry.level)
                };
                self.queue.push_holder(ctx);
            }
            EntryState::Waiter => {
                let timer = entry.timeout.map(|t| {
                    self.timer.schedule(
                        t,
                        TimerFire {
                            lock: self.lock_id.clone(),
                            owner: entry.owner,
                        },
                    )
                });
                self.queue.push_waiter(LockContext::waiter(
                    entry.owner,
                    entry.level,
                    entry.timeout,
                    timer,
                ));
            }
            EntryState::Pending | EntryState::TryPending => {
                return Err(WardenError::ReestablishConflict {
                    lock: self.lock_id.clone(),
                    reason: format!("{} replayed an unanswerable state", entry.owner),
                });
            }
        }

        self.stats.reestablished();
        debug!(lock = %self.lock_id, owner = %entry.owner, state = ?entry.state, "state reestablished");
        Ok(())
    }

    /// Drop every interest belonging to a disconnected client, cancelling
    /// timers. Returns (entries removed, queue now empty) so the caller can
    /// garbage-collect the lock record.
    pub fn clear_client(&mut self, client: ClientId) -> (usize, bool) {
        let removed = self.queue.remove_client(client);
        let count = removed.len();
        drop(removed);

        if count > 0 {
            self.stats.cleared(count);
            debug!(lock = %self.lock_id, client, count, "client state cleared");
            // A removed exclusive holder may unblock others.
            self.award_all_possible();
        }
        (count, self.queue.is_empty())
    }

    /// Commit point of the greedy revocation protocol. The non-greedy
    /// policy has nothing to commit.
    pub fn recall_commit(&mut self) {
        debug!(lock = %self.lock_id, "recall commit");
        self.policy.on_recall_commit(&mut self.queue);
    }

    /// Validation applied to lock/try-lock before enqueueing.
    fn validate_request(&self, owner: LockOwner, level: LockLevel) -> Result<()> {
        let Some(existing) = self.queue.find(owner) else {
            return Ok(());
        };

        match existing.state() {
            EntryState::Waiter => Err(WardenError::SelfWait {
                lock: self.lock_id.clone(),
                owner,
            }),
            EntryState::Holder | EntryState::GreedyHolder => {
                if existing.level().is_shared() && level.is_exclusive() {
                    Err(WardenError::UpgradeNotSupported {
                        lock: self.lock_id.clone(),
                        owner,
                    })
                } else {
                    // Re-requesting a held level, or shared under an
                    // exclusive hold, should never come from a correct
                    // client.
                    Err(WardenError::DuplicateRequest {
                        lock: self.lock_id.clone(),
                        owner,
                        level,
                    })
                }
            }
            EntryState::Pending | EntryState::TryPending => Err(WardenError::DuplicateRequest {
                lock: self.lock_id.clone(),
                owner,
                level,
            }),
        }
    }

    /// Resolve and apply every award the policy allows in the current state.
    fn award_all_possible(&mut self) {
        let awards = self.policy.resolve_awards(&mut self.queue);
        for mut ctx in awards {
            let owner = ctx.owner();
            let level = ctx.level();
            ctx.award();
            self.queue.push_holder(ctx);
            self.sink.push(ResponseEvent::new(LockResponse::Awarded {
                lock: self.lock_id.clone(),
                owner,
                level,
            }));
            self.stats.awarded(level);
            debug!(lock = %self.lock_id, %owner, %level, "lock awarded");
        }
    }

    fn reject(&mut self, owner: LockOwner, level: LockLevel) {
        self.sink.push(ResponseEvent::new(LockResponse::Rejected {
            lock: self.lock_id.clone(),
            owner,
            level,
        }));
        self.stats.rejected();
        debug!(lock = %self.lock_id, %owner, %level, "try-lock rejected");
    }
}
