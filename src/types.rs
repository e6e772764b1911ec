//! Core type definitions for the warden lock manager.
//!
//! This module contains the fundamental data types used throughout warden:
//! lock identifiers, the (client, thread) interest key, lock levels, and the
//! read-only snapshot types served to management views.
//!
//! # Key Types
//!
//! - [`LockId`]: opaque, comparable identifier of one distributed lock
//! - [`LockOwner`]: the (client, thread) pair identifying one interest-holder
//! - [`LockLevel`]: shared (read) or exclusive (write)
//! - [`LockSnapshot`]: point-in-time view of one lock's queue
//!
//! # Type Aliases
//!
//! - [`ClientId`] = `u64`: connected client process identifier
//! - [`ThreadId`] = `u64`: logical thread within a client
//!
//! # Examples
//!
//! ```rust
//! use warden::types::{LockId, LockLevel, LockOwner};
//!
//! let lock = LockId::new("orders:1042");
//! let owner = LockOwner::new(7, 3);
//! assert!(LockLevel::Shared.is_shared());
//! assert_eq!(format!("{}", owner), "7:3");
//! assert_eq!(lock.as_str(), "orders:1042");
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier of a connected client process.
pub type ClientId = u64;

/// Identifier of a logical thread within a client process.
pub type ThreadId = u64;

/// Opaque, immutable, comparable identifier of one distributed lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockId(String);

impl LockId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LockId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LockId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (client, thread) pair uniquely identifying one interest-holder
/// within a lock's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockOwner {
    /// Client process identifier.
    pub client: ClientId,
    /// Logical thread within the client.
    pub thread: ThreadId,
}

impl LockOwner {
    pub fn new(client: ClientId, thread: ThreadId) -> Self {
        Self { client, thread }
    }
}

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client, self.thread)
    }
}

/// Lock level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockLevel {
    /// Shared lock (multiple readers).
    Shared,
    /// Exclusive lock (single writer).
    Exclusive,
}

impl LockLevel {
    pub fn is_shared(&self) -> bool {
        matches!(self, LockLevel::Shared)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, LockLevel::Exclusive)
    }
}

impl std::fmt::Display for LockLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockLevel::Shared => write!(f, "shared"),
            LockLevel::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// How many waiters a notify should wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyAction {
    /// Wake the earliest waiter.
    One,
    /// Wake every waiter.
    All,
}

/// State of a queue entry as reported in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Currently granted.
    Holder,
    /// Granted wholesale to a client for repeated local use.
    GreedyHolder,
    /// Queued for award, no deadline.
    Pending,
    /// Queued for award with a deadline.
    TryPending,
    /// A former holder suspended via wait().
    Waiter,
}

impl EntryState {
    /// Entry currently holds the lock.
    pub fn is_holder(&self) -> bool {
        matches!(self, EntryState::Holder | EntryState::GreedyHolder)
    }

    /// Entry is queued for award (pending or try-pending).
    pub fn is_queued(&self) -> bool {
        matches!(self, EntryState::Pending | EntryState::TryPending)
    }

    /// Entry is suspended in wait().
    pub fn is_waiter(&self) -> bool {
        matches!(self, EntryState::Waiter)
    }
}

/// One entry in a [`LockSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEntrySnapshot {
    /// Who holds the interest.
    pub owner: LockOwner,
    /// Requested or granted level.
    pub level: LockLevel,
    /// Current state of the entry.
    pub state: EntryState,
    /// Remaining time before the entry's deadline, if it has one.
    pub remaining_timeout_ms: Option<u64>,
}

/// Read-only, point-in-time view of one lock suitable for management
/// introspection. Carries no mutation capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSnapshot {
    /// The lock this snapshot describes.
    pub lock: LockId,
    /// Holder and waiter entries, in queue order.
    pub entries: Vec<LockEntrySnapshot>,
    /// Number of pending (not yet granted) requests.
    pub pending: usize,
}

impl LockSnapshot {
    /// Entries currently holding the lock.
    pub fn holders(&self) -> impl Iterator<Item = &LockEntrySnapshot> {
        self.entries.iter().filter(|e| e.state.is_holder())
    }

    /// Entries suspended in wait().
    pub fn waiters(&self) -> impl Iterator<Item = &LockEntrySnapshot> {
        self.entries.iter().filter(|e| e.state.is_waiter())
    }
}

/// Client-reported lock state replayed after a reconnect.
///
/// Only holder and waiter states are legal to replay; a client has no
/// business re-reporting an unanswered request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReestablishedLock {
    /// The lock being replayed.
    pub lock: LockId,
    /// The interest-holder being reinstalled.
    pub owner: LockOwner,
    /// Level previously granted or waited under.
    pub level: LockLevel,
    /// Reported state: must be a holder or waiter state.
    pub state: EntryState,
    /// Remaining wait timeout for replayed waiters.
    pub timeout: Option<Duration>,
}
