//! Coordination-service client abstraction.
//!
//! The lock protocol only needs a handful of primitives from a hierarchical,
//! watch-based coordination service: ordered child listing, existence checks
//! that arm a one-shot watch, ephemeral sequential creation and delete. A
//! concrete client also delivers [`Notification`]s (watch fires and
//! connection-state transitions) on an unbounded channel handed out when the
//! session is opened; see [`crate::memory::MemoryEnsemble::connect`].

use async_trait::async_trait;
use thiserror::Error;

/// Native failures of the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The connection to the service is currently down.
    #[error("connection loss")]
    ConnectionLoss,
    /// The session ended; its ephemeral nodes are gone.
    #[error("session expired")]
    SessionExpired,
    /// The client was closed by its owner.
    #[error("client closed")]
    Closed,
    #[error("no node at '{0}'")]
    NoNode(String),
    #[error("node already exists at '{0}'")]
    NodeExists(String),
    #[error("node '{0}' has children")]
    NotEmpty(String),
}

/// Connection state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Session established, operations are served.
    Connected,
    /// Link lost; the session may still come back.
    Disconnected,
    /// The session is gone for good.
    SessionExpired,
}

/// What happened to a watched node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Deleted,
}

/// A fired one-shot watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub path: String,
    pub kind: EventKind,
}

/// Everything a client reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    State(ConnectionState),
    Watch(WatchedEvent),
}

/// The subset of a coordination service consumed by the lock protocol.
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Create persistent nodes along `path` that do not exist yet.
    async fn ensure_path(&self, path: &str) -> Result<(), ClientError>;

    /// Create an ephemeral node under `parent` whose name is `prefix`
    /// followed by a sequence number assigned by the service. Returns the
    /// full path of the new node.
    async fn create_sequential_ephemeral(
        &self,
        parent: &str,
        prefix: &str,
    ) -> Result<String, ClientError>;

    /// Names (not paths) of the children of `parent`, in no particular order.
    async fn list_children(&self, parent: &str) -> Result<Vec<String>, ClientError>;

    /// Whether `path` exists. Arms a one-shot watch that delivers exactly one
    /// [`Notification::Watch`] on the next create or delete of `path`.
    async fn exists_with_watch(&self, path: &str) -> Result<bool, ClientError>;

    async fn delete(&self, path: &str) -> Result<(), ClientError>;

    /// End the session. Its ephemeral nodes are removed by the service.
    async fn close(&self) -> Result<(), ClientError>;
}
