//! Sharded dispatch stage over the per-lock grant engines.
//!
//! Engines are not thread-safe by design; [`LockService`] supplies the
//! serialization they assume. Locks are partitioned across N shard tasks by
//! identity, each shard a single-writer tokio task that owns the engines for
//! its partition and processes commands from an mpsc channel one at a time.
//! Different locks on different shards proceed fully in parallel with no
//! shared mutable state.
//!
//! Timer fires take the same path as ordinary requests: the timer task sends
//! a [`TimerFire`] command into the owning shard's channel rather than
//! calling the engine directly, so a fire is just another serialized event.
//!
//! Synchronous results (validation errors, notified pairs, snapshots) come
//! back over oneshot channels; award/reject/timeout outcomes flow through
//! the shared response channel handed out by [`LockService::new`].

use crate::config::ServiceConfig;
use crate::engine::GrantEngine;
use crate::error::{Result, WardenError};
use crate::policy::{GrantPolicy, NonGreedyPolicy};
use crate::sink::{ChannelSink, LockSink, ResponseEvent};
use crate::stats::{LockStats, RuntimeStats, StatsSink};
use crate::store::{LockStore, ReapSet};
use crate::timer::{LockTimer, TimerFire, TokioTimer};
use crate::types::{
    ClientId, LockId, LockLevel, LockOwner, LockSnapshot, NotifyAction, ReestablishedLock,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum Command {
    Lock {
        lock: LockId,
        owner: LockOwner,
        level: LockLevel,
        reply: oneshot::Sender<Result<()>>,
    },
    TryLock {
        lock: LockId,
        owner: LockOwner,
        level: LockLevel,
        timeout: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    Unlock {
        lock: LockId,
        owner: LockOwner,
        reply: oneshot::Sender<Result<()>>,
    },
    Wait {
        lock: LockId,
        owner: LockOwner,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
    },
    Notify {
        lock: LockId,
        owner: LockOwner,
        action: NotifyAction,
        reply: oneshot::Sender<Result<Vec<LockOwner>>>,
    },
    Interrupt {
        lock: LockId,
        owner: LockOwner,
        reply: oneshot::Sender<Result<()>>,
    },
    Query {
        lock: LockId,
        reply: oneshot::Sender<Option<LockSnapshot>>,
    },
    AllLocks {
        reply: oneshot::Sender<Vec<LockSnapshot>>,
    },
    Reestablish {
        entries: Vec<ReestablishedLock>,
        reply: oneshot::Sender<Result<()>>,
    },
    ClearClient {
        client: ClientId,
        reply: oneshot::Sender<usize>,
    },
    RecallCommit {
        lock: LockId,
        reply: oneshot::Sender<()>,
    },
    TimerFired(TimerFire),
    Shutdown,
}

/// One single-writer partition of the lock table.
struct Shard {
    id: usize,
    engines: HashMap<LockId, GrantEngine>,
    policy: Arc<dyn GrantPolicy>,
    sink: Arc<dyn LockSink>,
    timer: Arc<dyn LockTimer>,
    stats: Arc<dyn StatsSink>,
    reap: Arc<ReapSet>,
}

impl Shard {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!(shard = self.id, "lock shard started");
        while let Some(cmd) = rx.recv().await {
            if matches!(cmd, Command::Shutdown) {
                break;
            }
            self.handle(cmd);
            self.collect_empty();
        }
        debug!(shard = self.id, locks = self.engines.len(), "lock shard stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Lock {
                lock,
                owner,
                level,
                reply,
            } => {
                let result = self.engine_for(lock).lock(owner, level);
                self.finish(result, reply);
            }
            Command::TryLock {
                lock,
                owner,
                level,
                timeout,
                reply,
            } => {
                let result = self.engine_for(lock).try_lock(owner, level, timeout);
                self.finish(result, reply);
            }
            Command::Unlock { lock, owner, reply } => {
                let result = match self.engines.get_mut(&lock) {
                    Some(engine) => engine.unlock(owner),
                    // Same benign race as unlock of a non-holder.
                    None => Ok(()),
                };
                self.finish(result, reply);
            }
            Command::Wait {
                lock,
                owner,
                timeout,
                reply,
            } => {
                let result = match self.engines.get_mut(&lock) {
                    Some(engine) => engine.wait(owner, timeout),
                    None => Err(WardenError::NotLockHolder { lock, owner }),
                };
                self.finish(result, reply);
            }
            Command::Notify {
                lock,
                owner,
                action,
                reply,
            } => {
                let result = match self.engines.get_mut(&lock) {
                    Some(engine) => engine.notify(owner, action),
                    None => Err(WardenError::NotLockHolder { lock, owner }),
                };
                self.finish(result, reply);
            }
            Command::Interrupt { lock, owner, reply } => {
                let result = match self.engines.get_mut(&lock) {
                    Some(engine) => engine.interrupt(owner),
                    None => {
                        warn!(%lock, %owner, "interrupt for unknown lock ignored");
                        Ok(())
                    }
                };
                self.finish(result, reply);
            }
            Command::Query { lock, reply } => {
                let _ = reply.send(self.engines.get(&lock).map(|e| e.query()));
            }
            Command::AllLocks { reply } => {
                let snapshots = self.engines.values().map(|e| e.query()).collect();
                let _ = reply.send(snapshots);
            }
            Command::Reestablish { entries, reply } => {
                let mut result = Ok(());
                for entry in &entries {
                    if let Err(e) = self.engine_for(entry.lock.clone()).reestablish(entry) {
                        result = Err(e);
                        break;
                    }
                }
                // A rejected replay may have created a record that never
                // received an entry; drop it rather than leak it.
                self.engines.retain(|_, engine| !engine.is_empty());
                self.finish(result, reply);
            }
            Command::ClearClient { client, reply } => {
                let mut removed = 0;
                let mut collectible = Vec::new();
                for engine in self.engines.values_mut() {
                    let (count, empty) = engine.clear_client(client);
                    removed += count;
                    if empty {
                        collectible.push(engine.lock_id().clone());
                    }
                }
                for lock in collectible {
                    self.engines.remove(&lock);
                    debug!(shard = self.id, %lock, "empty lock collected after client cleanup");
                }
                let _ = reply.send(removed);
            }
            Command::RecallCommit { lock, reply } => {
                if let Some(engine) = self.engines.get_mut(&lock) {
                    engine.recall_commit();
                }
                let _ = reply.send(());
            }
            Command::TimerFired(fire) => {
                match self.engines.get_mut(&fire.lock) {
                    Some(engine) => {
                        if let Err(e) = engine.timer_timeout(fire.owner) {
                            error!(lock = %fire.lock, owner = %fire.owner, error = %e, "timeout handling failed");
                        }
                    }
                    // Lock already collected; the fire lost the race.
                    None => debug!(lock = %fire.lock, "timer fire for unknown lock ignored"),
                }
            }
            Command::Shutdown => {}
        }
    }

    fn engine_for(&mut self, lock: LockId) -> &mut GrantEngine {
        self.engines.entry(lock.clone()).or_insert_with(|| {
            debug!(shard = self.id, %lock, "lock record created");
            GrantEngine::new(
                lock,
                Arc::clone(&self.policy),
                Arc::clone(&self.sink),
                Arc::clone(&self.timer),
                Arc::clone(&self.stats),
                Arc::clone(&self.reap) as Arc<dyn LockStore>,
            )
        })
    }

    /// Send the operation result back, logging protocol violations loudly.
    fn finish<T>(&self, result: Result<T>, reply: oneshot::Sender<Result<T>>) {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(shard = self.id, error = %e, "protocol violation");
            }
        }
        let _ = reply.send(result);
    }

    /// Drop lock records whose queues emptied during the last command.
    fn collect_empty(&mut self) {
        for lock in self.reap.drain() {
            // Re-check: a new interest may have arrived since the mark.
            if self.engines.get(&lock).is_some_and(|e| e.is_empty()) {
                self.engines.remove(&lock);
                debug!(shard = self.id, %lock, "empty lock collected");
            }
        }
        crate::observability::update_lock_gauge(self.id, self.engines.len());
    }
}

/// Sharded, single-writer lock service: the embedding surface of warden.
///
/// Must be created from within a tokio runtime. Award, reject, and
/// wait-timeout outcomes are delivered on the response channel returned by
/// [`LockService::new`]; the surrounding server forwards them to clients.
pub struct LockService {
    shards: Vec<mpsc::UnboundedSender<Command>>,
    handles: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
    stats: Arc<RuntimeStats>,
}

impl LockService {
    /// Start a service granting through the non-greedy policy.
    pub fn new(config: &ServiceConfig) -> (Self, mpsc::UnboundedReceiver<ResponseEvent>) {
        Self::with_policy(config, Arc::new(NonGreedyPolicy))
    }

    /// Start a service with a custom granting policy.
    pub fn with_policy(
        config: &ServiceConfig,
        policy: Arc<dyn GrantPolicy>,
    ) -> (Self, mpsc::UnboundedReceiver<ResponseEvent>) {
        let (sink, responses) = ChannelSink::new();
        let sink: Arc<dyn LockSink> = Arc::new(sink);
        let stats = Arc::new(RuntimeStats::new());

        let shard_count = config.shards.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        let mut handles = Vec::with_capacity(shard_count);

        for id in 0..shard_count {
            let (tx, rx) = mpsc::unbounded_channel();
            let fire_tx = tx.clone();
            let timer: Arc<dyn LockTimer> = Arc::new(TokioTimer::new(move |fire| {
                if fire_tx.send(Command::TimerFired(fire)).is_err() {
                    debug!("shard gone, timer fire dropped");
                }
            }));

            let shard = Shard {
                id,
                engines: HashMap::new(),
                policy: Arc::clone(&policy),
                sink: Arc::clone(&sink),
                timer,
                stats: Arc::clone(&stats) as Arc<dyn StatsSink>,
                reap: Arc::new(ReapSet::new()),
            };
            handles.push(tokio::spawn(shard.run(rx)));
            shards.push(tx);
        }

        info!(shards = shard_count, "lock service started");
        (
            Self {
                shards,
                handles,
                shutdown_grace: config.shutdown_grace,
                stats,
            },
            responses,
        )
    }

    /// Request `lock` at `level`; the award arrives on the response channel.
    pub async fn lock(&self, lock: LockId, owner: LockOwner, level: LockLevel) -> Result<()> {
        let shard = self.shard_index(&lock);
        self.call(shard, |reply| Command::Lock {
            lock,
            owner,
            level,
            reply,
        })
        .await?
    }

    /// Request `lock` with a deadline; zero means "only if free right now".
    pub async fn try_lock(
        &self,
        lock: LockId,
        owner: LockOwner,
        level: LockLevel,
        timeout: Duration,
    ) -> Result<()> {
        let shard = self.shard_index(&lock);
        self.call(shard, |reply| Command::TryLock {
            lock,
            owner,
            level,
            timeout,
            reply,
        })
        .await?
    }

    /// Release a held lock. Releasing a lock not held is a no-op.
    pub async fn unlock(&self, lock: LockId, owner: LockOwner) -> Result<()> {
        let shard = self.shard_index(&lock);
        self.call(shard, |reply| Command::Unlock { lock, owner, reply })
            .await?
    }

    /// Suspend an exclusive holder until notify/interrupt/timeout.
    pub async fn wait(
        &self,
        lock: LockId,
        owner: LockOwner,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let shard = self.shard_index(&lock);
        self.call(shard, |reply| Command::Wait {
            lock,
            owner,
            timeout,
            reply,
        })
        .await?
    }

    /// Wake one or all waiters; returns the woken (client, thread) pairs.
    pub async fn notify(
        &self,
        lock: LockId,
        owner: LockOwner,
        action: NotifyAction,
    ) -> Result<Vec<LockOwner>> {
        let shard = self.shard_index(&lock);
        self.call(shard, |reply| Command::Notify {
            lock,
            owner,
            action,
            reply,
        })
        .await?
    }

    /// Interrupt a waiter, converting it back into a pending request.
    pub async fn interrupt(&self, lock: LockId, owner: LockOwner) -> Result<()> {
        let shard = self.shard_index(&lock);
        self.call(shard, |reply| Command::Interrupt { lock, owner, reply })
            .await?
    }

    /// Snapshot one lock, if it has any interests.
    pub async fn query(&self, lock: LockId) -> Result<Option<LockSnapshot>> {
        let shard = self.shard_index(&lock);
        self.call(shard, |reply| Command::Query { lock, reply })
            .await
    }

    /// Snapshot every active lock across all shards.
    pub async fn all_locks(&self) -> Result<Vec<LockSnapshot>> {
        let mut receivers = Vec::with_capacity(self.shards.len());
        for tx in &self.shards {
            let (reply, rx) = oneshot::channel();
            tx.send(Command::AllLocks { reply })
                .map_err(|_| Self::unavailable())?;
            receivers.push(rx);
        }

        let mut snapshots = Vec::new();
        for rx in receivers {
            snapshots.extend(rx.await.map_err(|_| Self::unavailable())?);
        }
        snapshots.sort_by(|a, b| a.lock.cmp(&b.lock));
        Ok(snapshots)
    }

    /// Replay client-reported lock state after a reconnect.
    pub async fn reestablish(&self, entries: Vec<ReestablishedLock>) -> Result<()> {
        let mut by_shard: HashMap<usize, Vec<ReestablishedLock>> = HashMap::new();
        for entry in entries {
            by_shard
                .entry(self.shard_index(&entry.lock))
                .or_default()
                .push(entry);
        }

        let mut receivers = Vec::with_capacity(by_shard.len());
        for (shard, batch) in by_shard {
            let (reply, rx) = oneshot::channel();
            self.shards[shard]
                .send(Command::Reestablish {
                    entries: batch,
                    reply,
                })
                .map_err(|_| Self::unavailable())?;
            receivers.push(rx);
        }

        for rx in receivers {
            rx.await.map_err(|_| Self::unavailable())??;
        }
        Ok(())
    }

    /// Drop every interest of a disconnected client across all shards.
    /// Returns the number of entries removed.
    pub async fn clear_client(&self, client: ClientId) -> Result<usize> {
        let mut receivers = Vec::with_capacity(self.shards.len());
        for tx in &self.shards {
            let (reply, rx) = oneshot::channel();
            tx.send(Command::ClearClient { client, reply })
                .map_err(|_| Self::unavailable())?;
            receivers.push(rx);
        }

        let mut removed = 0;
        for rx in receivers {
            removed += rx.await.map_err(|_| Self::unavailable())?;
        }
        if removed > 0 {
            info!(client, removed, "client lock state cleared");
        }
        Ok(removed)
    }

    /// Commit a greedy recall for `lock`. A no-op under the non-greedy
    /// policy; present so revocation-capable policies can plug in.
    pub async fn recall_commit(&self, lock: LockId) -> Result<()> {
        let shard = self.shard_index(&lock);
        self.call(shard, |reply| Command::RecallCommit { lock, reply })
            .await
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }

    /// Stop all shards, waiting up to the configured grace period for each.
    pub async fn shutdown(self) {
        info!("lock service shutting down");
        for tx in &self.shards {
            let _ = tx.send(Command::Shutdown);
        }
        for handle in self.handles {
            if tokio::time::timeout(self.shutdown_grace, handle)
                .await
                .is_err()
            {
                warn!("shard did not drain within grace period");
            }
        }
        info!("lock service shutdown complete");
    }

    async fn call<T>(
        &self,
        shard: usize,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.shards[shard]
            .send(build(reply))
            .map_err(|_| Self::unavailable())?;
        rx.await.map_err(|_| Self::unavailable())
    }

    fn shard_index(&self, lock: &LockId) -> usize {
        let mut hasher = DefaultHasher::new();
        lock.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    fn unavailable() -> WardenError {
        WardenError::ServiceUnavailable("lock shard terminated".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::LockResponse;

    fn config() -> ServiceConfig {
        ServiceConfig {
            shards: 2,
            shutdown_grace: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn lock_award_flows_through_response_channel() {
        let (service, mut responses) = LockService::new(&config());
        let owner = LockOwner::new(1, 1);

        service
            .lock(LockId::new("a"), owner, LockLevel::Exclusive)
            .await
            .unwrap();

        let event = responses.recv().await.expect("award delivered");
        assert!(matches!(
            event.response,
            LockResponse::Awarded { owner: o, .. } if o == owner
        ));

        let stats = service.stats();
        assert_eq!(stats.requested, 1);
        assert_eq!(stats.awarded, 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn query_reflects_holder_and_gc() {
        let (service, _responses) = LockService::new(&config());
        let owner = LockOwner::new(1, 1);
        let lock = LockId::new("a");

        service
            .lock(lock.clone(), owner, LockLevel::Shared)
            .await
            .unwrap();
        let snap = service.query(lock.clone()).await.unwrap().expect("live lock");
        assert_eq!(snap.holders().count(), 1);

        service.unlock(lock.clone(), owner).await.unwrap();
        assert!(service.query(lock).await.unwrap().is_none());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn validation_errors_come_back_synchronously() {
        let (service, _responses) = LockService::new(&config());
        let owner = LockOwner::new(1, 1);
        let lock = LockId::new("a");

        service
            .lock(lock.clone(), owner, LockLevel::Shared)
            .await
            .unwrap();
        let err = service
            .lock(lock, owner, LockLevel::Exclusive)
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::UpgradeNotSupported { .. }));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn all_locks_spans_shards() {
        let (service, _responses) = LockService::new(&config());
        for i in 0..8 {
            service
                .lock(
                    LockId::new(format!("lock-{}", i)),
                    LockOwner::new(i, 1),
                    LockLevel::Exclusive,
                )
                .await
                .unwrap();
        }

        let snapshots = service.all_locks().await.unwrap();
        assert_eq!(snapshots.len(), 8);

        service.shutdown().await;
    }
}
