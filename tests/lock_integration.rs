//! End-to-end tests for the lock service: full request/award/response flows
//! through the sharded dispatch stage, including timer-driven outcomes.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use warden::config::ServiceConfig;
use warden::service::LockService;
use warden::sink::{LockResponse, ResponseEvent};
use warden::types::{
    EntryState, LockId, LockLevel, LockOwner, NotifyAction, ReestablishedLock,
};

fn test_config() -> ServiceConfig {
    ServiceConfig {
        shards: 2,
        shutdown_grace: Duration::from_secs(1),
    }
}

async fn next_response(responses: &mut UnboundedReceiver<ResponseEvent>) -> LockResponse {
    tokio::time::timeout(Duration::from_secs(5), responses.recv())
        .await
        .expect("response within deadline")
        .expect("response channel open")
        .response
}

fn assert_awarded(response: LockResponse, owner: LockOwner, level: LockLevel) {
    match response {
        LockResponse::Awarded {
            owner: o, level: l, ..
        } => {
            assert_eq!(o, owner);
            assert_eq!(l, level);
        }
        other => panic!("expected award for {}, got {:?}", owner, other),
    }
}

#[tokio::test]
async fn read_sharing_after_exclusive_release() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("shared-doc");
    let (a, b, c) = (LockOwner::new(1, 1), LockOwner::new(2, 1), LockOwner::new(3, 1));

    service.lock(lock.clone(), a, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Exclusive);

    // B queues behind the writer.
    service.lock(lock.clone(), b, LockLevel::Shared).await.unwrap();
    let snap = service.query(lock.clone()).await.unwrap().unwrap();
    assert_eq!(snap.pending, 1);

    service.unlock(lock.clone(), a).await.unwrap();
    assert_awarded(next_response(&mut responses).await, b, LockLevel::Shared);

    // A second reader joins without queueing.
    service.lock(lock.clone(), c, LockLevel::Shared).await.unwrap();
    assert_awarded(next_response(&mut responses).await, c, LockLevel::Shared);

    let snap = service.query(lock).await.unwrap().unwrap();
    assert_eq!(snap.holders().count(), 2);
    assert_eq!(snap.pending, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn wait_notify_handoff() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("job-queue");
    let (a, b) = (LockOwner::new(1, 1), LockOwner::new(2, 1));

    service.lock(lock.clone(), a, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Exclusive);

    // A suspends; the lock becomes free for B.
    service.wait(lock.clone(), a, None).await.unwrap();
    service.lock(lock.clone(), b, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, b, LockLevel::Exclusive);

    let woken = service.notify(lock.clone(), b, NotifyAction::One).await.unwrap();
    assert_eq!(woken, vec![a]);

    // B still holds until it unlocks; then A re-acquires.
    let snap = service.query(lock.clone()).await.unwrap().unwrap();
    assert_eq!(snap.holders().count(), 1);
    assert_eq!(snap.pending, 1);

    service.unlock(lock.clone(), b).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Exclusive);

    service.shutdown().await;
}

#[tokio::test]
async fn notify_without_exclusive_hold_fails() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("guarded");
    let a = LockOwner::new(1, 1);

    service.lock(lock.clone(), a, LockLevel::Shared).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Shared);

    assert!(service.wait(lock.clone(), a, None).await.is_err());
    assert!(service.notify(lock, a, NotifyAction::All).await.is_err());

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn try_lock_times_out_under_contention() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("contended");
    let (a, c) = (LockOwner::new(1, 1), LockOwner::new(3, 1));

    service.lock(lock.clone(), a, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Exclusive);

    service
        .try_lock(lock.clone(), c, LockLevel::Exclusive, Duration::from_millis(50))
        .await
        .unwrap();

    // The deadline elapses before A releases.
    match next_response(&mut responses).await {
        LockResponse::Rejected { owner, .. } => assert_eq!(owner, c),
        other => panic!("expected rejection, got {:?}", other),
    }

    // C's entry is gone: releasing now awards nobody.
    service.unlock(lock.clone(), a).await.unwrap();
    assert!(service.query(lock).await.unwrap().is_none());

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_try_lock_is_immediate() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("busy");
    let (a, b) = (LockOwner::new(1, 1), LockOwner::new(2, 1));

    service.lock(lock.clone(), a, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Exclusive);

    service
        .try_lock(lock.clone(), b, LockLevel::Shared, Duration::ZERO)
        .await
        .unwrap();
    match next_response(&mut responses).await {
        LockResponse::Rejected { owner, .. } => assert_eq!(owner, b),
        other => panic!("expected rejection, got {:?}", other),
    }

    // Nothing was left queued behind the holder.
    let snap = service.query(lock).await.unwrap().unwrap();
    assert_eq!(snap.pending, 0);

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timed_wait_elapses_and_reacquires() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("timed-wait");
    let (a, b) = (LockOwner::new(1, 1), LockOwner::new(2, 1));

    service.lock(lock.clone(), a, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Exclusive);

    service
        .wait(lock.clone(), a, Some(Duration::from_millis(50)))
        .await
        .unwrap();
    service.lock(lock.clone(), b, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, b, LockLevel::Exclusive);

    // The wait deadline fires while B holds: A is told and re-queued.
    match next_response(&mut responses).await {
        LockResponse::WaitTimedOut { owner, .. } => assert_eq!(owner, a),
        other => panic!("expected wait timeout, got {:?}", other),
    }

    service.unlock(lock.clone(), b).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Exclusive);

    service.shutdown().await;
}

#[tokio::test]
async fn disconnect_cleanup_collects_the_lock() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("doomed");

    // Client 7 holds exclusively on one thread and tries on another.
    service
        .lock(lock.clone(), LockOwner::new(7, 1), LockLevel::Exclusive)
        .await
        .unwrap();
    assert_awarded(
        next_response(&mut responses).await,
        LockOwner::new(7, 1),
        LockLevel::Exclusive,
    );
    service
        .try_lock(
            lock.clone(),
            LockOwner::new(7, 2),
            LockLevel::Exclusive,
            Duration::from_secs(30),
        )
        .await
        .unwrap();

    let removed = service.clear_client(7).await.unwrap();
    assert_eq!(removed, 2);

    // The lock record is gone from the table.
    assert!(service.query(lock).await.unwrap().is_none());
    assert_eq!(service.stats().cleared, 2);

    service.shutdown().await;
}

#[tokio::test]
async fn disconnect_cleanup_unblocks_other_clients() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("survivor");
    let (x, b) = (LockOwner::new(7, 1), LockOwner::new(2, 1));

    service.lock(lock.clone(), x, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, x, LockLevel::Exclusive);
    service.lock(lock.clone(), b, LockLevel::Shared).await.unwrap();

    service.clear_client(7).await.unwrap();
    assert_awarded(next_response(&mut responses).await, b, LockLevel::Shared);

    service.shutdown().await;
}

#[tokio::test]
async fn reestablish_replays_holders_and_waiters() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("replayed");
    let (a, w) = (LockOwner::new(1, 1), LockOwner::new(2, 1));

    service
        .reestablish(vec![
            ReestablishedLock {
                lock: lock.clone(),
                owner: a,
                level: LockLevel::Exclusive,
                state: EntryState::Holder,
                timeout: None,
            },
            ReestablishedLock {
                lock: lock.clone(),
                owner: w,
                level: LockLevel::Exclusive,
                state: EntryState::Waiter,
                timeout: Some(Duration::from_secs(60)),
            },
        ])
        .await
        .unwrap();

    let snap = service.query(lock.clone()).await.unwrap().unwrap();
    assert_eq!(snap.holders().count(), 1);
    assert_eq!(snap.waiters().count(), 1);

    // Replay installs directly: no award responses were emitted.
    service.unlock(lock.clone(), a).await.unwrap();
    // The queue still has the waiter, so the lock record survives and
    // nothing is awarded.
    let snap = service.query(lock).await.unwrap().unwrap();
    assert_eq!(snap.holders().count(), 0);
    assert_eq!(snap.waiters().count(), 1);
    assert!(responses.try_recv().is_err());

    service.shutdown().await;
}

#[tokio::test]
async fn conflicting_replay_is_rejected() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("conflict");
    let a = LockOwner::new(1, 1);

    service.lock(lock.clone(), a, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Exclusive);

    let err = service
        .reestablish(vec![ReestablishedLock {
            lock,
            owner: LockOwner::new(2, 1),
            level: LockLevel::Exclusive,
            state: EntryState::Holder,
            timeout: None,
        }])
        .await
        .unwrap_err();
    assert!(err.is_fatal());

    service.shutdown().await;
}

#[tokio::test]
async fn stats_track_the_full_lifecycle() {
    let (service, mut responses) = LockService::new(&test_config());
    let lock = LockId::new("counted");
    let a = LockOwner::new(1, 1);

    service.lock(lock.clone(), a, LockLevel::Exclusive).await.unwrap();
    assert_awarded(next_response(&mut responses).await, a, LockLevel::Exclusive);
    service.unlock(lock, a).await.unwrap();

    let stats = service.stats();
    assert_eq!(stats.requested, 1);
    assert_eq!(stats.awarded, 1);
    assert_eq!(stats.released, 1);
    assert_eq!(stats.hops, 0);

    service.shutdown().await;
}
