//! Sequential lock coordinator.
//!
//! Mutual exclusion built from ephemeral sequential markers and one-shot
//! watches:
//!
//! 1. create `<root>/<key>/lock-<seq>` (ephemeral, sequential)
//! 2. list the siblings and order them by `<seq>`
//! 3. lowest marker holds the lock
//! 4. everyone else watches only its immediate predecessor, so a release
//!    wakes exactly one contender
//! 5. after every wake the listing is re-checked: a predecessor can vanish
//!    because it gave up, not only because it released
//!
//! Markers are ephemeral, so a crashed holder's session expiry releases the
//! lock without any scanner.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ClientError, ConnectionState, CoordinationClient};
use crate::error::{LockError, LockResult};
use crate::marker::{self, MARKER_PREFIX, Marker, SiblingSet, Standing};
use crate::metrics;
use crate::notify::WaitSignal;
use crate::session::SessionShared;

/// Position of a lock handle in its lifecycle.
///
/// `Idle → MarkerCreated → {Granted | Watching}`, `Watching → {Granted |
/// TimedOut}`, `Granted → Released`. Errors end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockState {
    Idle,
    MarkerCreated,
    Watching,
    Granted,
    TimedOut,
    Released,
    Failed,
}

impl LockState {
    /// No further attempt can be made with this handle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LockState::TimedOut | LockState::Released | LockState::Failed
        )
    }
}

enum Outcome {
    Granted,
    TimedOut,
}

enum Wake {
    Signal(WaitSignal),
    Deadline,
    Cancelled,
}

/// Deadline for a wait of `timeout` from now. Waits too long to represent
/// (`Duration::MAX`) end roughly 30 years out, as tokio's own far future.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// Keeps the waiting gauge honest when an acquire future is dropped mid-wait.
struct WaitingGuard;

impl WaitingGuard {
    fn new() -> Self {
        metrics::LOCK_WAITING.inc();
        Self
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        metrics::LOCK_WAITING.dec();
    }
}

/// A single lock attempt against one key.
///
/// Obtained from [`crate::LockSession::lock`]. A handle runs at most one
/// attempt; once it has timed out, failed or been released, ask the session
/// for a new one.
#[derive(Debug)]
pub struct SequentialLock<C: CoordinationClient> {
    shared: Arc<SessionShared<C>>,
    id: Uuid,
    state: LockState,
    key: Option<String>,
    marker: Option<Marker>,
    watching: Option<String>,
}

impl<C: CoordinationClient> SequentialLock<C> {
    pub(crate) fn new(shared: Arc<SessionShared<C>>) -> Self {
        Self {
            shared,
            id: Uuid::new_v4(),
            state: LockState::Idle,
            key: None,
            marker: None,
            watching: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state. A granted lock whose session expired or was closed
    /// reports `Failed`: its marker is gone and someone else may hold it.
    pub fn state(&self) -> LockState {
        if self.state == LockState::Granted && self.session_lost() {
            LockState::Failed
        } else {
            self.state
        }
    }

    pub fn is_held(&self) -> bool {
        self.state() == LockState::Granted
    }

    fn session_lost(&self) -> bool {
        let router = &self.shared.router;
        router.is_shut_down()
            || router.connection_state() == Some(ConnectionState::SessionExpired)
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Path of this attempt's marker while it exists.
    pub fn marker_path(&self) -> Option<&str> {
        self.marker.as_ref().map(Marker::path)
    }

    /// Sequence number the service assigned to this attempt's marker.
    pub fn sequence(&self) -> Option<u64> {
        self.marker.as_ref().map(Marker::sequence)
    }

    /// The predecessor marker currently watched, if waiting.
    pub fn watching(&self) -> Option<&str> {
        self.watching.as_deref()
    }

    /// Non-blocking attempt: granted only if nobody is ahead right now.
    pub async fn try_acquire(&mut self, key: &str) -> LockResult<bool> {
        self.acquire(key, Duration::ZERO).await
    }

    /// Acquire with the session's configured default wait.
    pub async fn acquire_default(&mut self, key: &str) -> LockResult<bool> {
        let wait = self.shared.config.default_wait();
        self.acquire(key, wait).await
    }

    /// Acquire `key`, waiting at most `timeout` for the holders ahead.
    ///
    /// `timeout` bounds only the waiting phase, never marker creation.
    /// Returns `Ok(false)` when the deadline passes; the attempt's marker is
    /// removed before returning so it does not block later arrivals.
    pub async fn acquire(&mut self, key: &str, timeout: Duration) -> LockResult<bool> {
        self.acquire_cancellable(key, timeout, &CancellationToken::new())
            .await
    }

    /// [`acquire`](Self::acquire) that also gives up with
    /// [`LockError::Interrupted`] when `cancel` fires during the wait.
    pub async fn acquire_cancellable(
        &mut self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> LockResult<bool> {
        if self.state != LockState::Idle {
            return Err(LockError::InvalidState(self.state));
        }
        marker::validate_key(key)?;

        let parent = marker::lock_parent(&self.shared.root, key);
        self.key = Some(key.to_owned());

        let own = match self.create_marker(&parent).await {
            Ok(own) => own,
            Err(err) => {
                self.state = LockState::Failed;
                metrics::LOCK_FAILED.inc();
                return Err(err);
            }
        };
        debug!(attempt = %self.id, key, marker = %own, "created lock marker");
        self.marker = Some(own.clone());
        self.state = LockState::MarkerCreated;

        let deadline = deadline_after(timeout);
        let result = self.contend(&parent, &own, deadline, cancel).await;
        self.watching = None;

        match result {
            Ok(Outcome::Granted) => {
                self.state = LockState::Granted;
                metrics::LOCK_GRANTED.inc();
                info!(attempt = %self.id, key, marker = %own, "lock granted");
                Ok(true)
            }
            Ok(Outcome::TimedOut) => {
                self.abandon().await;
                self.state = LockState::TimedOut;
                metrics::LOCK_TIMED_OUT.inc();
                info!(attempt = %self.id, key, ?timeout, "lock wait timed out");
                Ok(false)
            }
            Err(err) => {
                self.abandon().await;
                self.state = LockState::Failed;
                metrics::LOCK_FAILED.inc();
                warn!(attempt = %self.id, key, error = %err, "lock acquisition failed");
                Err(err)
            }
        }
    }

    async fn create_marker(&self, parent: &str) -> LockResult<Marker> {
        let client = &self.shared.client;
        client.ensure_path(parent).await?;
        let path = client
            .create_sequential_ephemeral(parent, MARKER_PREFIX)
            .await?;
        Marker::from_path(&path).ok_or_else(|| {
            LockError::ProtocolViolation(format!(
                "sequential create returned '{path}', which is not a lock marker"
            ))
        })
    }

    async fn contend(
        &mut self,
        parent: &str,
        own: &Marker,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> LockResult<Outcome> {
        let client = &self.shared.client;
        let router = &self.shared.router;

        loop {
            let children = client.list_children(parent).await?;
            let siblings = SiblingSet::from_children(parent, &children);

            let predecessor = match siblings.standing(own) {
                Standing::Holder => return Ok(Outcome::Granted),
                Standing::Missing => return Err(self.missing_marker(own, parent)),
                Standing::Behind { predecessor, ahead } => {
                    debug!(attempt = %self.id, marker = %own, %predecessor, ahead, "waiting behind predecessor");
                    predecessor.path().to_owned()
                }
            };

            if Instant::now() >= deadline {
                return Ok(Outcome::TimedOut);
            }

            // register before arming the watch so the fire cannot slip past us;
            // the registration goes away with `waiter`
            let mut waiter = router.register(&predecessor);
            if !client.exists_with_watch(&predecessor).await? {
                continue;
            }
            self.state = LockState::Watching;
            self.watching = Some(predecessor.clone());

            let wake = {
                let _waiting = WaitingGuard::new();
                tokio::select! {
                    biased;
                    signal = waiter.recv() => Wake::Signal(signal),
                    _ = cancel.cancelled() => Wake::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
                }
            };

            match wake {
                Wake::Signal(WaitSignal::Fired(kind)) => {
                    metrics::LOCK_WAKEUPS.inc();
                    debug!(attempt = %self.id, %predecessor, ?kind, "predecessor changed, re-checking");
                }
                Wake::Signal(WaitSignal::ConnectionLost(state)) => {
                    return Err(LockError::Connection(format!(
                        "{state:?} while waiting on {predecessor}"
                    )));
                }
                Wake::Signal(WaitSignal::Shutdown) if router.is_shut_down() => {
                    return Err(LockError::Interrupted(
                        "notification router shut down".into(),
                    ));
                }
                Wake::Signal(WaitSignal::Shutdown) => {
                    // registration was replaced, look again
                    debug!(attempt = %self.id, %predecessor, "waiter replaced, re-checking");
                }
                Wake::Deadline => return Ok(Outcome::TimedOut),
                Wake::Cancelled => {
                    return Err(LockError::Interrupted("acquisition cancelled".into()));
                }
            }
        }
    }

    fn missing_marker(&self, own: &Marker, parent: &str) -> LockError {
        if self.shared.router.connection_state() == Some(ConnectionState::SessionExpired) {
            LockError::Connection(format!("session expired, marker {own} was removed"))
        } else {
            LockError::ProtocolViolation(format!("own marker {own} missing from {parent}"))
        }
    }

    /// Remove the marker of an attempt that will not hold the lock.
    async fn abandon(&mut self) {
        let Some(own) = self.marker.take() else {
            return;
        };
        match self.shared.client.delete(own.path()).await {
            Ok(()) | Err(ClientError::NoNode(_)) => {
                metrics::LOCK_MARKERS_ABANDONED.inc();
                debug!(attempt = %self.id, marker = %own, "removed abandoned marker");
            }
            Err(ClientError::SessionExpired) => {
                debug!(attempt = %self.id, marker = %own, "session expired, marker already gone");
            }
            Err(err) => {
                warn!(attempt = %self.id, marker = %own, error = %err, "failed to remove abandoned marker");
                self.marker = Some(own);
            }
        }
    }

    /// Release the lock by deleting this attempt's marker.
    ///
    /// Returns `Ok(false)` without side effects when nothing is held, so a
    /// second call is harmless. A marker that is already gone counts as
    /// released.
    pub async fn release(&mut self) -> LockResult<bool> {
        let Some(own) = self.marker.take() else {
            debug!(attempt = %self.id, state = ?self.state, "release without a marker");
            return Ok(false);
        };

        match self.shared.client.delete(own.path()).await {
            Ok(()) => {}
            Err(ClientError::NoNode(_)) => {
                debug!(attempt = %self.id, marker = %own, "marker already removed");
            }
            Err(err) => {
                self.marker = Some(own);
                return Err(err.into());
            }
        }

        match self.state {
            LockState::Granted => {
                self.state = LockState::Released;
                metrics::LOCK_RELEASED.inc();
                info!(attempt = %self.id, key = ?self.key, marker = %own, "lock released");
                Ok(true)
            }
            // an in-flight acquire was dropped, or an earlier cleanup failed
            LockState::MarkerCreated | LockState::Watching => {
                self.state = LockState::Failed;
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}

impl<C: CoordinationClient> Drop for SequentialLock<C> {
    fn drop(&mut self) {
        let Some(own) = self.marker.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(attempt = %self.id, marker = %own, "handle dropped, removing marker");
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move {
                    if let Err(err) = shared.client.delete(own.path()).await {
                        debug!(marker = %own, error = %err, "marker cleanup after drop failed");
                    }
                });
            }
            Err(_) => {
                warn!(attempt = %self.id, marker = %own, "handle dropped outside a runtime, marker stays until the session ends");
            }
        }
    }
}
