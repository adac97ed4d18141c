//! A connected coordination session that hands out lock handles.

use std::sync::Arc;

use config::LockConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::{ConnectionState, CoordinationClient, Notification};
use crate::error::{LockError, LockResult};
use crate::lock::SequentialLock;
use crate::notify::NotificationRouter;

/// State shared by a session and every lock handle it created.
#[derive(Debug)]
pub(crate) struct SessionShared<C> {
    pub(crate) client: C,
    pub(crate) router: NotificationRouter,
    pub(crate) config: LockConfig,
    pub(crate) root: String,
}

/// One client session plus the router that consumes its notifications.
///
/// Every [`SequentialLock`] created by [`LockSession::lock`] shares the
/// session's client, so markers created through them live exactly as long as
/// the session does.
#[derive(Debug)]
pub struct LockSession<C: CoordinationClient> {
    shared: Arc<SessionShared<C>>,
    router_task: JoinHandle<()>,
}

impl<C: CoordinationClient> LockSession<C> {
    /// Start routing `notifications` and wait for the session to connect.
    ///
    /// Waits at most `config.connect_timeout()` for the first `Connected`
    /// notification and fails with [`LockError::Connection`] otherwise.
    pub async fn connect(
        client: C,
        notifications: mpsc::UnboundedReceiver<Notification>,
        config: LockConfig,
    ) -> LockResult<Self> {
        let (router, router_task) = NotificationRouter::spawn(notifications);
        let root = config.locks_root();

        debug!(%root, connect_timeout = ?config.connect_timeout(), "waiting for coordination session");
        if let Err(err) = router.wait_connected(config.connect_timeout()).await {
            router_task.abort();
            return Err(err);
        }

        // the namespace root is created once up front, per-key parents on demand
        if let Err(err) = client.ensure_path(&root).await {
            router_task.abort();
            return Err(err.into());
        }
        info!(%root, "lock session ready");

        Ok(Self {
            shared: Arc::new(SessionShared {
                client,
                router,
                config,
                root,
            }),
            router_task,
        })
    }

    /// A fresh, idle lock handle.
    pub fn lock(&self) -> SequentialLock<C> {
        SequentialLock::new(Arc::clone(&self.shared))
    }

    /// Acquire `key` on a fresh handle, returning the handle only if granted.
    pub async fn acquire(
        &self,
        key: &str,
        timeout: std::time::Duration,
    ) -> LockResult<Option<SequentialLock<C>>> {
        let mut lock = self.lock();
        Ok(lock.acquire(key, timeout).await?.then_some(lock))
    }

    pub fn client(&self) -> &C {
        &self.shared.client
    }

    pub fn config(&self) -> &LockConfig {
        &self.shared.config
    }

    /// Root path every lock key lives under.
    pub fn root(&self) -> &str {
        &self.shared.root
    }

    /// Last reported connection state.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.shared.router.connection_state()
    }

    /// Waits currently parked on a predecessor's watch.
    pub fn pending_waits(&self) -> usize {
        self.shared.router.pending()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == Some(ConnectionState::Connected)
    }

    /// Close the client session. The service drops every marker it owns,
    /// which wakes whichever contenders were watching them.
    pub async fn close(self) -> LockResult<()> {
        let result = self.shared.client.close().await;
        self.shared.router.shutdown();
        self.router_task.abort();
        match result {
            Ok(()) => {
                info!(root = %self.shared.root, "lock session closed");
                Ok(())
            }
            Err(err) => Err(LockError::from(err)),
        }
    }
}
