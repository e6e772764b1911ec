//! Error types for the warden lock manager.
//!
//! This module provides a unified error type [`WardenError`] for all warden
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! Errors fall into two classes with very different handling:
//!
//! - **Domain errors**: expected outcomes that are surfaced to the requesting
//!   client as normal failures — an unsupported lock upgrade, a wait/notify
//!   issued without holding the lock, a rejected try-lock. These never
//!   corrupt engine state.
//! - **Protocol violations**: requests that should be structurally impossible
//!   from a well-behaved client (duplicate lock requests, a second wait from
//!   the same thread, a conflicting state replay). These indicate
//!   client/server desync and are flagged by [`WardenError::is_fatal`] so the
//!   dispatch layer can fail loudly instead of silently corrupting a queue.
//!
//! # Example
//!
//! ```rust
//! use warden::error::WardenError;
//!
//! fn handle_error(err: &WardenError) {
//!     if err.is_fatal() {
//!         eprintln!("protocol violation, refusing to continue: {}", err);
//!     } else {
//!         eprintln!("request failed: {}", err);
//!     }
//! }
//! ```

use crate::types::{LockId, LockLevel, LockOwner};
use std::io;
use thiserror::Error;

/// Main error type for warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    // Domain errors: normal failures surfaced to the client.
    #[error("lock upgrade not supported: {owner} already holds shared on {lock}")]
    UpgradeNotSupported { lock: LockId, owner: LockOwner },

    #[error("{owner} does not hold {lock} exclusively")]
    NotLockHolder { lock: LockId, owner: LockOwner },

    #[error("try-lock failed for {owner} on {lock}")]
    TryLockFailed { lock: LockId, owner: LockOwner },

    // Protocol violations: client/server desync, fail fast.
    #[error("duplicate {level} request from {owner} on {lock}")]
    DuplicateRequest {
        lock: LockId,
        owner: LockOwner,
        level: LockLevel,
    },

    #[error("{owner} is already waiting on {lock}")]
    SelfWait { lock: LockId, owner: LockOwner },

    #[error("state replay conflict on {lock}: {reason}")]
    ReestablishConflict { lock: LockId, reason: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Infrastructure errors
    #[error("lock service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Check whether this error is a protocol/invariant violation that must
    /// stop processing loudly rather than be returned as a routine failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WardenError::DuplicateRequest { .. }
                | WardenError::SelfWait { .. }
                | WardenError::ReestablishConflict { .. }
                | WardenError::InvalidState(_)
        )
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        WardenError::Config(e.to_string())
    }
}

/// Result type alias for warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
