//! Granting policies.
//!
//! A [`GrantPolicy`] decides, after any mutating queue event, which
//! pending/try-pending entries become holders. The engine owns the queue and
//! the bookkeeping; the policy owns only the selection.
//!
//! [`NonGreedyPolicy`] is the server-authoritative policy: every award is an
//! individual grant to one client thread. A greedy sibling (wholesale grants
//! cached client-side) plugs in through the same trait and the
//! [`GrantPolicy::on_recall_commit`] hook.

use crate::context::LockContext;
use crate::queue::GrantQueue;

/// Strategy deciding which queued entries are awarded.
pub trait GrantPolicy: Send + Sync {
    /// Remove and return every entry that should become a holder given the
    /// current queue state. Returned entries are still in their queued
    /// state; the engine performs the promotion and response emission.
    fn resolve_awards(&self, queue: &mut GrantQueue) -> Vec<LockContext>;

    /// Commit point of the greedy-lock revocation protocol. Policies that
    /// never hand out greedy grants have nothing to do here.
    fn on_recall_commit(&self, _queue: &mut GrantQueue) {}
}

/// Award one exclusive request, or one shared request plus every other
/// pending shared request that precedes the first waiter.
///
/// The scan starts at the queue head, skips holders, and stops dead at the
/// first waiter: a request queued behind a waiter is never considered, which
/// is what gives wait() its monitor-like fairness.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonGreedyPolicy;

impl GrantPolicy for NonGreedyPolicy {
    fn resolve_awards(&self, queue: &mut GrantQueue) -> Vec<LockContext> {
        let level = match queue.head_candidate_level() {
            Some(level) => level,
            None => return Vec::new(),
        };
        if !queue.can_award(level) {
            return Vec::new();
        }

        let candidate = match queue.take_head_candidate() {
            Some(candidate) => candidate,
            None => return Vec::new(),
        };

        let mut awards = Vec::with_capacity(1);
        let batch_shared = candidate.level().is_shared();
        awards.push(candidate);

        // A shared award pulls along every compatible shared request ahead
        // of the first waiter. An earlier exclusive request cannot be
        // skipped this way: it would have been the head candidate itself.
        if batch_shared {
            awards.extend(queue.take_pending_shared());
        }
        awards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LockLevel, LockOwner};

    fn owner(client: u64) -> LockOwner {
        LockOwner::new(client, 1)
    }

    #[test]
    fn awards_single_exclusive() {
        let policy = NonGreedyPolicy;
        let mut queue = GrantQueue::new();
        queue.push_queued(LockContext::pending(owner(1), LockLevel::Exclusive));
        queue.push_queued(LockContext::pending(owner(2), LockLevel::Exclusive));

        let awards = policy.resolve_awards(&mut queue);
        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].owner(), owner(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn batches_shared_awards() {
        let policy = NonGreedyPolicy;
        let mut queue = GrantQueue::new();
        queue.push_queued(LockContext::pending(owner(1), LockLevel::Shared));
        queue.push_queued(LockContext::pending(owner(2), LockLevel::Exclusive));
        queue.push_queued(LockContext::pending(owner(3), LockLevel::Shared));

        let awards = policy.resolve_awards(&mut queue);
        let awarded: Vec<LockOwner> = awards.iter().map(|c| c.owner()).collect();
        assert_eq!(awarded, vec![owner(1), owner(3)]);

        // The exclusive request stays queued.
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.head_candidate_level(), Some(LockLevel::Exclusive));
    }

    #[test]
    fn waiter_is_never_awarded() {
        let policy = NonGreedyPolicy;
        let mut queue = GrantQueue::new();
        queue.push_queued(LockContext::pending(owner(1), LockLevel::Shared));
        queue.push_waiter(LockContext::waiter(
            owner(2),
            LockLevel::Exclusive,
            None,
            None,
        ));

        let awards = policy.resolve_awards(&mut queue);
        let awarded: Vec<LockOwner> = awards.iter().map(|c| c.owner()).collect();
        assert_eq!(awarded, vec![owner(1)]);

        // The waiter stays put until a notify converts it.
        assert_eq!(queue.len(), 1);
        assert!(policy.resolve_awards(&mut queue).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn exclusive_blocked_by_any_holder() {
        let policy = NonGreedyPolicy;
        let mut queue = GrantQueue::new();
        queue.push_holder(LockContext::holder(owner(1), LockLevel::Shared));
        queue.push_queued(LockContext::pending(owner(2), LockLevel::Exclusive));

        assert!(policy.resolve_awards(&mut queue).is_empty());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn shared_compatible_with_shared_holder() {
        let policy = NonGreedyPolicy;
        let mut queue = GrantQueue::new();
        queue.push_holder(LockContext::holder(owner(1), LockLevel::Shared));
        queue.push_queued(LockContext::pending(owner(2), LockLevel::Shared));

        let awards = policy.resolve_awards(&mut queue);
        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].owner(), owner(2));
    }

    #[test]
    fn waiter_at_head_blocks_everything() {
        let policy = NonGreedyPolicy;
        let mut queue = GrantQueue::new();
        queue.push_waiter(LockContext::waiter(
            owner(1),
            LockLevel::Exclusive,
            None,
            None,
        ));
        assert!(policy.resolve_awards(&mut queue).is_empty());
    }

    #[test]
    fn empty_queue_awards_nothing() {
        let policy = NonGreedyPolicy;
        let mut queue = GrantQueue::new();
        assert!(policy.resolve_awards(&mut queue).is_empty());
    }
}
