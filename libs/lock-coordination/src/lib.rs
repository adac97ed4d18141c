//! # lock-coordination
//!
//! Distributed mutual exclusion for a fleet of processes sharing a
//! hierarchical, watch-based coordination service.
//!
//! This library provides:
//! - **Client abstraction** ([`CoordinationClient`]) over the few service
//!   primitives the protocol needs, plus the notification model.
//! - **Notification router** that gates startup on the first `Connected`
//!   event and wakes exactly the contender watching a fired path.
//! - **Sequential lock** with FIFO grants, bounded waits, cancellation and
//!   idempotent release.
//! - **In-memory ensemble** implementing the client, with knobs for
//!   availability, disconnects and session expiry.
//!
//! ## Guarantees
//!
//! - At most one holder per key at any instant.
//! - Grants follow marker creation order.
//! - A release wakes only the next contender in line.
//! - A holder whose session ends releases the lock without any cleanup job.

pub mod client;
pub mod error;
pub mod lock;
pub mod marker;
pub mod memory;
pub mod metrics;
pub mod notify;
pub mod session;

// Re-export key types for convenient access
pub use client::{
    ClientError, ConnectionState, CoordinationClient, EventKind, Notification, WatchedEvent,
};
pub use error::{LockError, LockResult};
pub use lock::{LockState, SequentialLock};
pub use marker::{MARKER_PREFIX, Marker, SiblingSet, Standing};
pub use memory::{MemoryEnsemble, MemorySession, SessionId};
pub use notify::{NotificationRouter, WaitSignal, Waiter};
pub use session::LockSession;
