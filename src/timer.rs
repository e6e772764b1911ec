//! Timeout scheduling for try-lock deadlines and timed waits.
//!
//! The engine never sleeps: deadlines are handed to a [`LockTimer`], which
//! fires a [`TimerFire`] event back into the same serialized dispatch channel
//! as ordinary requests. A fire racing with an award or notify is expected;
//! the engine treats "entry no longer present" as a normal no-op.
//!
//! Every scheduled deadline is represented by a [`TimerHandle`]. The handle
//! is cancelled exactly once, at the earliest of award, explicit removal, or
//! the fire itself; [`TimerHandle::cancel`] is idempotent.

use crate::types::{LockId, LockOwner};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// A deadline elapsing for one interest on one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    /// The lock whose entry timed out.
    pub lock: LockId,
    /// The interest-holder whose deadline elapsed.
    pub owner: LockOwner,
}

/// Cancellable handle to a scheduled timeout.
///
/// Cancellation is idempotent: the first call (or the fire itself) wins, and
/// every later call is a no-op.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    /// Cancel the timeout. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            if let Some(abort) = &self.abort {
                abort.abort();
            }
        }
    }

    /// Whether the timeout has been cancelled or has already fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// A handle with no backing task. Used by timers that track fires
    /// externally (manual timers in tests) and by replayed state.
    pub fn inert() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            abort: None,
        }
    }
}

/// Schedules timeout fires for the engine.
///
/// Implementations must deliver fires into the engine's serialized execution
/// context, never call into the engine from the timer's own task.
pub trait LockTimer: Send + Sync {
    /// Schedule `fire` to be delivered after `delay`.
    fn schedule(&self, delay: Duration, fire: TimerFire) -> TimerHandle;
}

/// Tokio-backed timer: each deadline sleeps on its own task and hands the
/// fire to a delivery callback (in practice, a send into the owning shard's
/// command channel).
pub struct TokioTimer {
    deliver: Arc<dyn Fn(TimerFire) + Send + Sync>,
}

impl TokioTimer {
    pub fn new(deliver: impl Fn(TimerFire) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }
}

impl LockTimer for TokioTimer {
    fn schedule(&self, delay: Duration, fire: TimerFire) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let deliver = Arc::clone(&self.deliver);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The fire consumes the one allowed cancellation, so a cancel
            // arriving after this point is a no-op.
            if !flag.swap(true, Ordering::SeqCst) {
                deliver(fire);
            }
        });
        TimerHandle {
            cancelled,
            abort: Some(task.abort_handle()),
        }
    }
}

/// Recording timer for deterministic tests: nothing fires until the test
/// delivers the fire itself.
#[derive(Default)]
pub struct ManualTimer {
    scheduled: parking_lot::Mutex<Vec<(Duration, TimerFire, TimerHandle)>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timeouts scheduled so far, cancelled or not.
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().len()
    }

    /// Scheduled fires whose handles are still live.
    pub fn live_fires(&self) -> Vec<TimerFire> {
        self.scheduled
            .lock()
            .iter()
            .filter(|(_, _, handle)| !handle.is_cancelled())
            .map(|(_, fire, _)| fire.clone())
            .collect()
    }
}

impl LockTimer for ManualTimer {
    fn schedule(&self, delay: Duration, fire: TimerFire) -> TimerHandle {
        let handle = TimerHandle::inert();
        self.scheduled.lock().push((delay, fire, handle.clone()));
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cancel_is_idempotent() {
        let handle = TimerHandle::inert();
        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_delivers_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let timer = TokioTimer::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let fire = TimerFire {
            lock: LockId::new("l"),
            owner: LockOwner::new(1, 1),
        };
        let handle = timer.schedule(Duration::from_millis(50), fire);

        tokio::time::sleep(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Cancel after fire is a no-op.
        handle.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let timer = TokioTimer::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let fire = TimerFire {
            lock: LockId::new("l"),
            owner: LockOwner::new(1, 1),
        };
        let handle = timer.schedule(Duration::from_millis(50), fire);
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn manual_timer_records_and_cancels() {
        let timer = ManualTimer::new();
        let fire = TimerFire {
            lock: LockId::new("l"),
            owner: LockOwner::new(1, 2),
        };
        let handle = timer.schedule(Duration::from_millis(10), fire.clone());
        assert_eq!(timer.scheduled_count(), 1);
        assert_eq!(timer.live_fires(), vec![fire]);

        handle.cancel();
        assert!(timer.live_fires().is_empty());
    }
}
