//! Routing of client notifications.
//!
//! A client session delivers every notification on one channel. The router
//! consumes it and fans the events out:
//! - connection-state transitions feed the startup gate
//!   ([`NotificationRouter::wait_connected`]) and fail every pending wait when
//!   the link drops,
//! - watch fires wake the single waiter registered for the watched path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::client::{ConnectionState, EventKind, Notification};
use crate::error::{LockError, LockResult};

/// Why a waiter woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSignal {
    /// The watched node changed.
    Fired(EventKind),
    /// The session lost its link while waiting.
    ConnectionLost(ConnectionState),
    /// The notification channel closed; nothing will ever wake this waiter.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Pending,
    State(ConnectionState),
    Shutdown,
}

#[derive(Debug, Default)]
struct Registry {
    waiters: HashMap<String, Registration>,
    next_id: u64,
    state: Option<ConnectionState>,
    shut_down: bool,
}

#[derive(Debug)]
struct Registration {
    id: u64,
    tx: oneshot::Sender<WaitSignal>,
}

#[derive(Debug)]
struct RouterInner {
    registry: Mutex<Registry>,
    link: watch::Sender<Link>,
}

/// Dispatches connection events to the startup gate and watch fires to the
/// waiter registered for that exact path.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    inner: Arc<RouterInner>,
}

/// A registration for the next event on one path.
///
/// Dropping the waiter removes its registration, so a wait abandoned
/// mid-flight leaves nothing behind in the router.
#[derive(Debug)]
pub struct Waiter {
    path: String,
    id: u64,
    rx: oneshot::Receiver<WaitSignal>,
    router: Arc<RouterInner>,
}

impl Waiter {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the signal. Cancel safe.
    pub async fn recv(&mut self) -> WaitSignal {
        (&mut self.rx).await.unwrap_or(WaitSignal::Shutdown)
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut registry = self
            .router
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // a newer registration for the same path is not ours to remove
        if registry
            .waiters
            .get(&self.path)
            .is_some_and(|reg| reg.id == self.id)
        {
            registry.waiters.remove(&self.path);
        }
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRouter {
    pub fn new() -> Self {
        let (link, _) = watch::channel(Link::Pending);
        Self {
            inner: Arc::new(RouterInner {
                registry: Mutex::new(Registry::default()),
                link,
            }),
        }
    }

    /// Create a router and spawn the task that drains `notifications` into
    /// it. The router shuts down once the channel closes.
    pub fn spawn(mut notifications: mpsc::UnboundedReceiver<Notification>) -> (Self, JoinHandle<()>) {
        let router = Self::new();
        let task_router = router.clone();
        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                task_router.dispatch(notification);
            }
            debug!("notification channel closed");
            task_router.shutdown();
        });
        (router, handle)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Route a single notification.
    pub fn dispatch(&self, notification: Notification) {
        match notification {
            Notification::State(state) => self.on_state(state),
            Notification::Watch(event) => {
                let waiter = self.registry().waiters.remove(&event.path);
                match waiter {
                    Some(reg) => {
                        trace!(path = %event.path, kind = ?event.kind, "waking waiter");
                        // the waiter may have given up already
                        let _ = reg.tx.send(WaitSignal::Fired(event.kind));
                    }
                    None => {
                        debug!(path = %event.path, kind = ?event.kind, "watch fired with no waiter");
                    }
                }
            }
        }
    }

    fn on_state(&self, state: ConnectionState) {
        {
            let mut registry = self.registry();
            if registry.shut_down {
                return;
            }
            registry.state = Some(state);
        }
        self.inner.link.send_replace(Link::State(state));
        match state {
            ConnectionState::Connected => info!("coordination session connected"),
            ConnectionState::Disconnected | ConnectionState::SessionExpired => {
                let drained = std::mem::take(&mut self.registry().waiters);
                warn!(
                    ?state,
                    pending_waits = drained.len(),
                    "coordination link lost, failing pending waits"
                );
                for (_, reg) in drained {
                    let _ = reg.tx.send(WaitSignal::ConnectionLost(state));
                }
            }
        }
    }

    /// Register interest in the next event on `path`.
    ///
    /// Only one waiter per path is kept; a newer registration replaces the
    /// previous one. After shutdown the returned waiter resolves to
    /// [`WaitSignal::Shutdown`] immediately.
    pub fn register(&self, path: &str) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        if !registry.shut_down
            && registry
                .waiters
                .insert(path.to_owned(), Registration { id, tx })
                .is_some()
        {
            debug!(path, "replaced stale waiter registration");
        }
        Waiter {
            path: path.to_owned(),
            id,
            rx,
            router: Arc::clone(&self.inner),
        }
    }

    /// Drop the registration for `path`, if any.
    pub fn cancel(&self, path: &str) {
        self.registry().waiters.remove(path);
    }

    /// Number of registered waiters.
    pub fn pending(&self) -> usize {
        self.registry().waiters.len()
    }

    /// Stop routing: pending waiters observe [`WaitSignal::Shutdown`].
    pub fn shutdown(&self) {
        let drained = {
            let mut registry = self.registry();
            registry.shut_down = true;
            std::mem::take(&mut registry.waiters)
        };
        // dropping the senders resolves every waiter to Shutdown
        drop(drained);
        self.inner.link.send_replace(Link::Shutdown);
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry().shut_down
    }

    /// Last connection state reported by the client, `None` before the first.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.registry().state
    }

    /// Block until the client reports `Connected`.
    ///
    /// Fails with [`LockError::Connection`] when `timeout` elapses first, when
    /// the session expires, or when the router shuts down.
    pub async fn wait_connected(&self, timeout: Duration) -> LockResult<()> {
        let mut rx = self.inner.link.subscribe();
        let ready = tokio::time::timeout(
            timeout,
            rx.wait_for(|link| {
                matches!(
                    link,
                    Link::State(ConnectionState::Connected)
                        | Link::State(ConnectionState::SessionExpired)
                        | Link::Shutdown
                )
            }),
        )
        .await
        .map_err(|_| {
            LockError::Connection(format!(
                "no connection to the coordination service after {timeout:?}"
            ))
        })?
        .map(|link| *link)
        .map_err(|_| LockError::Connection("notification router dropped".into()))?;

        match ready {
            Link::State(ConnectionState::Connected) => Ok(()),
            Link::State(ConnectionState::SessionExpired) => Err(LockError::Connection(
                "session expired before it was established".into(),
            )),
            _ => Err(LockError::Connection(
                "notification channel closed before connecting".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WatchedEvent;

    fn deleted(path: &str) -> Notification {
        Notification::Watch(WatchedEvent {
            path: path.into(),
            kind: EventKind::Deleted,
        })
    }

    #[tokio::test]
    async fn test_watch_wakes_registered_waiter_only() {
        let router = NotificationRouter::new();
        let mut a = router.register("/locks/k/lock-0000000001");
        let mut b = router.register("/locks/k/lock-0000000002");
        assert_eq!(router.pending(), 2);

        router.dispatch(deleted("/locks/k/lock-0000000001"));
        assert_eq!(a.recv().await, WaitSignal::Fired(EventKind::Deleted));
        assert_eq!(router.pending(), 1);

        // a second fire for the same path finds no waiter
        router.dispatch(deleted("/locks/k/lock-0000000001"));
        assert_eq!(router.pending(), 1);

        router.cancel("/locks/k/lock-0000000002");
        assert_eq!(router.pending(), 0);
        assert_eq!(b.recv().await, WaitSignal::Shutdown);
    }

    #[tokio::test]
    async fn test_newer_registration_replaces_older() {
        let router = NotificationRouter::new();
        let mut old = router.register("/p");
        let mut new = router.register("/p");
        assert_eq!(router.pending(), 1);
        router.dispatch(deleted("/p"));
        assert_eq!(new.recv().await, WaitSignal::Fired(EventKind::Deleted));
        assert_eq!(old.recv().await, WaitSignal::Shutdown);
    }

    #[tokio::test]
    async fn test_dropped_waiter_unregisters() {
        let router = NotificationRouter::new();
        let waiter = router.register("/p");
        assert_eq!(router.pending(), 1);
        drop(waiter);
        assert_eq!(router.pending(), 0);

        // dropping a replaced waiter leaves the newer registration alone
        let old = router.register("/p");
        let mut new = router.register("/p");
        drop(old);
        assert_eq!(router.pending(), 1);
        router.dispatch(deleted("/p"));
        assert_eq!(new.recv().await, WaitSignal::Fired(EventKind::Deleted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_unregisters() {
        let router = NotificationRouter::new();
        let wait = {
            let router = router.clone();
            async move {
                let mut waiter = router.register("/p");
                waiter.recv().await
            }
        };
        let res = tokio::time::timeout(Duration::from_millis(50), wait).await;
        assert!(res.is_err());
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending() {
        let router = NotificationRouter::new();
        router.dispatch(Notification::State(ConnectionState::Connected));
        let mut w = router.register("/p");
        router.dispatch(Notification::State(ConnectionState::Disconnected));
        assert_eq!(
            w.recv().await,
            WaitSignal::ConnectionLost(ConnectionState::Disconnected)
        );
        assert_eq!(
            router.connection_state(),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_and_rejects() {
        let router = NotificationRouter::new();
        let mut w = router.register("/p");
        router.shutdown();
        assert!(router.is_shut_down());
        assert_eq!(w.recv().await, WaitSignal::Shutdown);

        let mut late = router.register("/q");
        assert_eq!(router.pending(), 0);
        assert_eq!(late.recv().await, WaitSignal::Shutdown);
    }

    #[tokio::test]
    async fn test_gate_opens_on_connected() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (router, _task) = NotificationRouter::spawn(rx);
        assert_eq!(router.connection_state(), None);

        let gate = {
            let router = router.clone();
            tokio::spawn(async move { router.wait_connected(Duration::from_secs(5)).await })
        };
        tx.send(Notification::State(ConnectionState::Connected))
            .unwrap();
        gate.await.unwrap().unwrap();
        assert_eq!(router.connection_state(), Some(ConnectionState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_times_out() {
        let router = NotificationRouter::new();
        let err = router
            .wait_connected(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_gate_fails_when_channel_closes() {
        let (tx, rx) = mpsc::unbounded_channel::<Notification>();
        let (router, task) = NotificationRouter::spawn(rx);
        drop(tx);
        task.await.unwrap();
        let err = router
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_connection());
        assert!(router.is_shut_down());
    }
}
