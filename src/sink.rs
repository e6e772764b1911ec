//! Outbound response channel.
//!
//! Award, reject, and wait-timeout outcomes leave the engine as
//! [`ResponseEvent`]s pushed into a [`LockSink`]. Pushes are fire-and-forget;
//! the ordering of events pushed by one engine call is preserved by the
//! sink implementation.

use crate::types::{LockId, LockLevel, LockOwner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Outcome of a lock operation, addressed to one client thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockResponse {
    /// The lock was granted at the given level.
    Awarded {
        lock: LockId,
        owner: LockOwner,
        level: LockLevel,
    },
    /// A try-lock gave up without being granted.
    Rejected {
        lock: LockId,
        owner: LockOwner,
        level: LockLevel,
    },
    /// A timed wait elapsed before a notify arrived.
    WaitTimedOut { lock: LockId, owner: LockOwner },
}

impl LockResponse {
    /// The client the response is addressed to.
    pub fn owner(&self) -> LockOwner {
        match self {
            LockResponse::Awarded { owner, .. }
            | LockResponse::Rejected { owner, .. }
            | LockResponse::WaitTimedOut { owner, .. } => *owner,
        }
    }

    /// The lock the response concerns.
    pub fn lock(&self) -> &LockId {
        match self {
            LockResponse::Awarded { lock, .. }
            | LockResponse::Rejected { lock, .. }
            | LockResponse::WaitTimedOut { lock, .. } => lock,
        }
    }
}

/// A [`LockResponse`] stamped for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEvent {
    /// Unique event ID.
    pub id: Uuid,
    /// When the outcome was decided.
    pub timestamp: DateTime<Utc>,
    /// The outcome itself.
    pub response: LockResponse,
}

impl ResponseEvent {
    pub fn new(response: LockResponse) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            response,
        }
    }
}

/// Outbound channel for lock responses. Fire-and-forget: implementations
/// must never block the engine and must preserve per-call ordering.
pub trait LockSink: Send + Sync {
    fn push(&self, event: ResponseEvent);
}

/// Sink backed by an unbounded tokio channel; the surrounding server drains
/// the receiver and maps events onto its wire protocol.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ResponseEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResponseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LockSink for ChannelSink {
    fn push(&self, event: ResponseEvent) {
        if self.tx.send(event).is_err() {
            debug!("response receiver dropped, discarding event");
        }
    }
}

/// Buffering sink that retains events in memory. Useful for embedding in
/// tests and tools that inspect responses after the fact.
#[derive(Default)]
pub struct MemorySink {
    events: parking_lot::Mutex<Vec<ResponseEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return all buffered events, oldest first.
    pub fn drain(&self) -> Vec<ResponseEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl LockSink for MemorySink {
    fn push(&self, event: ResponseEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awarded(client: u64) -> LockResponse {
        LockResponse::Awarded {
            lock: LockId::new("l"),
            owner: LockOwner::new(client, 1),
            level: LockLevel::Exclusive,
        }
    }

    #[test]
    fn memory_sink_preserves_order() {
        let sink = MemorySink::new();
        sink.push(ResponseEvent::new(awarded(1)));
        sink.push(ResponseEvent::new(awarded(2)));

        let events = sink.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].response.owner().client, 1);
        assert_eq!(events[1].response.owner().client, 2);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        sink.push(ResponseEvent::new(awarded(9)));

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.response.owner().client, 9);
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        // Must not panic or block.
        sink.push(ResponseEvent::new(awarded(1)));
    }
}
