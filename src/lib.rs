//! Warden - a server-side distributed lock manager.
//!
//! Warden is the authoritative server core of a clustered locking facility:
//! remote client threads request shared/exclusive locks by name, and warden
//! grants, queues, and revokes them with Java-monitor-like semantics
//! (lock/unlock, wait/notify, try-lock-with-timeout) over an asynchronous,
//! failure-prone network.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Warden                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  LockService: sharded single-writer dispatch                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  GrantEngine (per lock): queue | validation | timers        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  GrantPolicy: who is awarded next (non-greedy)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Collaborators: LockSink | LockTimer | LockStore | Stats    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each lock's queue is mutated by exactly one shard task, so the ordering
//! and exclusivity invariants need no internal locking. Lock state is purely
//! in-memory; after a reconnect, clients replay their granted/waiting state
//! through [`LockService::reestablish`].
//!
//! # Quick Start
//!
//! ```no_run
//! use warden::config::WardenConfig;
//! use warden::service::LockService;
//! use warden::types::{LockId, LockLevel, LockOwner};
//!
//! #[tokio::main]
//! async fn main() -> warden::Result<()> {
//!     let config = WardenConfig::development();
//!     warden::observability::init(&config.observability)?;
//!
//!     let (service, mut responses) = LockService::new(&config.service);
//!     service
//!         .lock(LockId::new("orders"), LockOwner::new(1, 1), LockLevel::Exclusive)
//!         .await?;
//!
//!     let award = responses.recv().await.expect("award");
//!     println!("granted: {:?}", award.response);
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod context;
pub mod engine;
pub mod policy;
pub mod queue;
pub mod service;
pub mod sink;
pub mod stats;
pub mod store;
pub mod timer;

pub mod observability;

// Re-exports
pub use error::{Result, WardenError};
pub use types::*;

pub use engine::GrantEngine;
pub use policy::{GrantPolicy, NonGreedyPolicy};
pub use service::LockService;
pub use sink::{LockResponse, LockSink, ResponseEvent};
pub use stats::LockStats;
