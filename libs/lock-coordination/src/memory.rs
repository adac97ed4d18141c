//! In-process coordination service.
//!
//! [`MemoryEnsemble`] keeps a node tree with persistent and ephemeral nodes,
//! per-parent sequence counters and one-shot watches, and hands out
//! [`MemorySession`] clients that implement [`CoordinationClient`]. The
//! ensemble can also be driven from the outside (availability, disconnects,
//! session expiry) to exercise the failure paths of the lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::client::{
    ClientError, ConnectionState, CoordinationClient, EventKind, Notification, WatchedEvent,
};

/// Session identifier assigned by the ensemble.
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Connected,
    Disconnected,
    Expired,
    Closed,
}

#[derive(Debug)]
struct SessionEntry {
    tx: Option<mpsc::UnboundedSender<Notification>>,
    status: SessionStatus,
}

impl SessionEntry {
    fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.tx {
            // the receiving router may be gone
            let _ = tx.send(notification);
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    ephemeral_owner: Option<SessionId>,
    next_seq: u64,
    created_at: DateTime<Utc>,
}

impl Node {
    fn new(ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            ephemeral_owner,
            next_seq: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
struct EnsembleState {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<SessionId, SessionEntry>,
    watches: HashMap<String, HashSet<SessionId>>,
    available: bool,
    next_session: SessionId,
}

impl Default for EnsembleState {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_owned(), Node::new(None));
        Self {
            nodes,
            sessions: HashMap::new(),
            watches: HashMap::new(),
            available: true,
            next_session: 1,
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn child_prefix(parent: &str) -> String {
    if parent == "/" {
        "/".to_owned()
    } else {
        format!("{parent}/")
    }
}

impl EnsembleState {
    fn check(&self, session: SessionId) -> Result<(), ClientError> {
        match self.sessions.get(&session).map(|s| s.status) {
            Some(SessionStatus::Connected) => Ok(()),
            Some(SessionStatus::Disconnected) => Err(ClientError::ConnectionLoss),
            Some(SessionStatus::Expired) => Err(ClientError::SessionExpired),
            Some(SessionStatus::Closed) | None => Err(ClientError::Closed),
        }
    }

    fn children(&self, parent: &str) -> Vec<String> {
        let prefix = child_prefix(parent);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, _)| {
                let name = &path[prefix.len()..];
                (!name.is_empty() && !name.contains('/')).then(|| name.to_owned())
            })
            .collect()
    }

    fn has_children(&self, parent: &str) -> bool {
        let prefix = child_prefix(parent);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .any(|(path, _)| path.len() > prefix.len())
    }

    /// Fire and clear every watch armed on `path`.
    fn fire(&mut self, path: &str, kind: EventKind) {
        let Some(watchers) = self.watches.remove(path) else {
            return;
        };
        for id in watchers {
            if let Some(entry) = self.sessions.get(&id) {
                trace!(session = id, path, ?kind, "delivering watch");
                entry.notify(Notification::Watch(WatchedEvent {
                    path: path.to_owned(),
                    kind,
                }));
            }
        }
    }

    fn remove_node(&mut self, path: &str) {
        if self.nodes.remove(path).is_some() {
            self.fire(path, EventKind::Deleted);
        }
    }

    /// End `session`: drop its ephemerals and its watches.
    fn end_session(&mut self, session: SessionId, status: SessionStatus) -> usize {
        let owned = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect::<Vec<_>>();
        for path in &owned {
            self.remove_node(path);
        }
        for watchers in self.watches.values_mut() {
            watchers.remove(&session);
        }
        self.watches.retain(|_, watchers| !watchers.is_empty());
        if let Some(entry) = self.sessions.get_mut(&session) {
            entry.status = status;
        }
        owned.len()
    }
}

/// A shared, in-memory coordination service.
#[derive(Debug, Clone, Default)]
pub struct MemoryEnsemble {
    inner: Arc<Mutex<EnsembleState>>,
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, EnsembleState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new client session.
    ///
    /// The receiver yields the session's notifications. `Connected` is sent
    /// right away when the ensemble is available, otherwise once it becomes
    /// available again.
    pub fn connect(&self) -> (MemorySession, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        let id = state.next_session;
        state.next_session += 1;

        let status = if state.available {
            let _ = tx.send(Notification::State(ConnectionState::Connected));
            SessionStatus::Connected
        } else {
            SessionStatus::Disconnected
        };
        state.sessions.insert(
            id,
            SessionEntry {
                tx: Some(tx),
                status,
            },
        );
        debug!(session = id, ?status, "session opened");

        (
            MemorySession {
                id,
                ensemble: self.clone(),
            },
            rx,
        )
    }

    /// Make the whole ensemble reachable or unreachable. Live sessions see
    /// `Disconnected` / `Connected` accordingly.
    pub fn set_available(&self, available: bool) {
        let mut state = self.state();
        if state.available == available {
            return;
        }
        state.available = available;
        let (from, to, event) = if available {
            (
                SessionStatus::Disconnected,
                SessionStatus::Connected,
                ConnectionState::Connected,
            )
        } else {
            (
                SessionStatus::Connected,
                SessionStatus::Disconnected,
                ConnectionState::Disconnected,
            )
        };
        for entry in state.sessions.values_mut() {
            if entry.status == from {
                entry.status = to;
                entry.notify(Notification::State(event));
            }
        }
        info!(available, "ensemble availability changed");
    }

    /// Expire `session` as the service would after its timeout: its
    /// ephemeral nodes are deleted and the client sees `SessionExpired`.
    pub fn expire_session(&self, session: SessionId) {
        let mut state = self.state();
        if matches!(
            state.sessions.get(&session).map(|s| s.status),
            None | Some(SessionStatus::Expired) | Some(SessionStatus::Closed)
        ) {
            return;
        }
        let removed = state.end_session(session, SessionStatus::Expired);
        if let Some(entry) = state.sessions.get(&session) {
            entry.notify(Notification::State(ConnectionState::SessionExpired));
        }
        info!(session, removed_ephemerals = removed, "session expired");
    }

    /// Cut the link of one session without ending it.
    pub fn disconnect(&self, session: SessionId) {
        let mut state = self.state();
        if let Some(entry) = state.sessions.get_mut(&session) {
            if entry.status == SessionStatus::Connected {
                entry.status = SessionStatus::Disconnected;
                entry.notify(Notification::State(ConnectionState::Disconnected));
                debug!(session, "session disconnected");
            }
        }
    }

    /// Restore the link of a disconnected session.
    pub fn reconnect(&self, session: SessionId) {
        let mut state = self.state();
        let available = state.available;
        if let Some(entry) = state.sessions.get_mut(&session) {
            if available && entry.status == SessionStatus::Disconnected {
                entry.status = SessionStatus::Connected;
                entry.notify(Notification::State(ConnectionState::Connected));
                debug!(session, "session reconnected");
            }
        }
    }

    /// Sorted child names of `path`; empty when it does not exist.
    pub fn children(&self, path: &str) -> Vec<String> {
        let state = self.state();
        if !state.nodes.contains_key(path) {
            return Vec::new();
        }
        state.children(path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().nodes.contains_key(path)
    }

    /// Session owning the ephemeral node at `path`.
    pub fn owner(&self, path: &str) -> Option<SessionId> {
        self.state().nodes.get(path).and_then(|n| n.ephemeral_owner)
    }

    pub fn created_at(&self, path: &str) -> Option<DateTime<Utc>> {
        self.state().nodes.get(path).map(|n| n.created_at)
    }

    /// Number of watches currently armed on `path`.
    pub fn watch_count(&self, path: &str) -> usize {
        self.state().watches.get(path).map_or(0, HashSet::len)
    }
}

/// A client session on a [`MemoryEnsemble`].
#[derive(Debug, Clone)]
pub struct MemorySession {
    id: SessionId,
    ensemble: MemoryEnsemble,
}

impl MemorySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn ensemble(&self) -> &MemoryEnsemble {
        &self.ensemble
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    async fn ensure_path(&self, path: &str) -> Result<(), ClientError> {
        let mut state = self.ensemble.state();
        state.check(self.id)?;

        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if !state.nodes.contains_key(&current) {
                state.nodes.insert(current.clone(), Node::new(None));
                trace!(path = %current, "created persistent node");
                state.fire(&current, EventKind::Created);
            }
        }
        Ok(())
    }

    async fn create_sequential_ephemeral(
        &self,
        parent: &str,
        prefix: &str,
    ) -> Result<String, ClientError> {
        let mut state = self.ensemble.state();
        state.check(self.id)?;

        let seq = {
            let node = state
                .nodes
                .get_mut(parent)
                .ok_or_else(|| ClientError::NoNode(parent.to_owned()))?;
            let seq = node.next_seq;
            node.next_seq += 1;
            seq
        };
        let path = join(parent, &format!("{prefix}{seq:010}"));
        if state.nodes.contains_key(&path) {
            return Err(ClientError::NodeExists(path));
        }
        state.nodes.insert(path.clone(), Node::new(Some(self.id)));
        trace!(session = self.id, %path, "created ephemeral sequential node");
        state.fire(&path, EventKind::Created);
        Ok(path)
    }

    async fn list_children(&self, parent: &str) -> Result<Vec<String>, ClientError> {
        let state = self.ensemble.state();
        state.check(self.id)?;
        if !state.nodes.contains_key(parent) {
            return Err(ClientError::NoNode(parent.to_owned()));
        }
        Ok(state.children(parent))
    }

    // Like ZooKeeper, the watch is armed whether or not the node exists: an
    // absent path keeps it until a create fires it or the session ends.
    async fn exists_with_watch(&self, path: &str) -> Result<bool, ClientError> {
        let mut state = self.ensemble.state();
        state.check(self.id)?;
        state
            .watches
            .entry(path.to_owned())
            .or_default()
            .insert(self.id);
        Ok(state.nodes.contains_key(path))
    }

    async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let mut state = self.ensemble.state();
        state.check(self.id)?;
        if path == "/" || !state.nodes.contains_key(path) {
            return Err(ClientError::NoNode(path.to_owned()));
        }
        if state.has_children(path) {
            return Err(ClientError::NotEmpty(path.to_owned()));
        }
        state.remove_node(path);
        trace!(session = self.id, path, "deleted node");
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        let mut state = self.ensemble.state();
        match state.sessions.get(&self.id).map(|s| s.status) {
            Some(SessionStatus::Closed) | None => return Err(ClientError::Closed),
            Some(SessionStatus::Expired) => {}
            Some(_) => {
                let removed = state.end_session(self.id, SessionStatus::Closed);
                debug!(session = self.id, removed_ephemerals = removed, "session closed");
            }
        }
        if let Some(entry) = state.sessions.get_mut(&self.id) {
            entry.status = SessionStatus::Closed;
            entry.tx = None;
        }
        Ok(())
    }
}
