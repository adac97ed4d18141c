mod common;

use std::time::Duration;

use anyhow::Result;
use common::{contender, contender_with, marker, wait_until};
use config::LockConfig;
use lock_coordination::{
    ConnectionState, CoordinationClient, LockError, LockSession, LockState, MemoryEnsemble,
};
use tracing_test::traced_test;

#[tokio::test(start_paused = true)]
async fn test_connect_gate_times_out() {
    let ensemble = MemoryEnsemble::new();
    ensemble.set_available(false);

    let (client, notifications) = ensemble.connect();
    let config = LockConfig::default().with_connect_timeout(Duration::from_millis(250));
    let err = LockSession::connect(client, notifications, config)
        .await
        .unwrap_err();
    assert!(err.is_connection(), "{err}");
}

#[tokio::test]
async fn test_connect_gate_opens_when_ensemble_returns() -> Result<()> {
    let ensemble = MemoryEnsemble::new();
    ensemble.set_available(false);

    let pending = {
        let ensemble = ensemble.clone();
        tokio::spawn(async move { contender(&ensemble).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!pending.is_finished());

    ensemble.set_available(true);
    let session = pending.await?;
    assert!(session.is_connected());
    assert!(ensemble.exists("/locks"));
    Ok(())
}

#[tokio::test]
async fn test_namespace_prefixes_every_path() -> Result<()> {
    let ensemble = MemoryEnsemble::new();
    let session = contender_with(&ensemble, LockConfig::default().with_namespace("billing")).await;
    assert_eq!(session.root(), "/billing/locks");

    let mut lock = session.lock();
    assert!(lock.try_acquire("invoice-7").await?);
    assert_eq!(
        lock.marker_path(),
        Some("/billing/locks/invoice-7/lock-0000000000")
    );
    Ok(())
}

#[tokio::test]
#[traced_test]
/// the holder crashes: its session expires and the next contender is granted
async fn test_crashed_holder_releases_lock() -> Result<()> {
    let ensemble = MemoryEnsemble::new();
    let holder_session = contender(&ensemble).await;
    let waiter_session = contender(&ensemble).await;

    let mut holder = holder_session.lock();
    assert!(holder.try_acquire("item").await?);
    assert!(holder.is_held());

    let mut waiter = waiter_session.lock();
    let t = tokio::spawn(async move {
        let granted = waiter.acquire("item", Duration::from_secs(30)).await;
        (waiter, granted)
    });
    wait_until(|| ensemble.watch_count(&marker("item", 0)) == 1).await;

    ensemble.expire_session(holder_session.client().id());
    let (waiter, granted) = t.await?;
    assert!(granted?);
    assert_eq!(waiter.state(), LockState::Granted);
    assert_eq!(ensemble.children("/locks/item"), vec!["lock-0000000001"]);

    wait_until(|| holder_session.connection_state() == Some(ConnectionState::SessionExpired))
        .await;
    assert!(!holder_session.is_connected());
    // only the new holder reports the lock as held
    assert!(waiter.is_held());
    assert!(!holder.is_held());
    assert_eq!(holder.state(), LockState::Failed);
    // the old holder can no longer talk to the service
    assert!(holder.release().await.unwrap_err().is_connection());
    Ok(())
}

#[tokio::test]
async fn test_closing_session_releases_its_locks() -> Result<()> {
    let ensemble = MemoryEnsemble::new();
    let holder_session = contender(&ensemble).await;
    let waiter_session = contender(&ensemble).await;

    let mut holder = holder_session.lock();
    assert!(holder.try_acquire("item").await?);
    let mut waiter = waiter_session.lock();
    let t = tokio::spawn(async move { waiter.acquire("item", Duration::from_secs(30)).await });
    wait_until(|| ensemble.watch_count(&marker("item", 0)) == 1).await;

    holder_session.close().await?;
    assert!(t.await??);
    assert!(!holder.is_held());
    assert_eq!(holder.state(), LockState::Failed);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_while_waiting_is_connection_failure() -> Result<()> {
    let ensemble = MemoryEnsemble::new();
    let holder_session = contender(&ensemble).await;
    let waiter_session = contender(&ensemble).await;
    let waiter_id = waiter_session.client().id();

    let mut holder = holder_session.lock();
    assert!(holder.try_acquire("item").await?);

    let mut waiter = waiter_session.lock();
    let t = tokio::spawn(async move {
        let res = waiter.acquire("item", Duration::from_secs(30)).await;
        (waiter, res)
    });
    wait_until(|| ensemble.watch_count(&marker("item", 0)) == 1).await;

    ensemble.disconnect(waiter_id);
    let (mut waiter, res) = t.await?;
    assert!(res.unwrap_err().is_connection());
    assert_eq!(waiter.state(), LockState::Failed);
    // cleanup could not reach the service, the marker is still ours
    assert_eq!(waiter.marker_path(), Some(marker("item", 1).as_str()));

    ensemble.reconnect(waiter_id);
    wait_until(|| waiter_session.is_connected()).await;
    assert!(!waiter.release().await?);
    assert_eq!(waiter.marker_path(), None);
    assert_eq!(ensemble.children("/locks/item"), vec!["lock-0000000000"]);
    assert!(holder.is_held());
    Ok(())
}

#[tokio::test]
async fn test_connection_loss_before_marker() {
    let ensemble = MemoryEnsemble::new();
    let session = contender(&ensemble).await;
    ensemble.disconnect(session.client().id());

    let mut lock = session.lock();
    let err = lock.try_acquire("item").await.unwrap_err();
    assert!(matches!(err, LockError::Connection(_)));
    assert_eq!(lock.state(), LockState::Failed);
    assert_eq!(lock.marker_path(), None);
}

#[tokio::test]
async fn test_closed_notification_channel_interrupts_waiters() -> Result<()> {
    let ensemble = MemoryEnsemble::new();
    let holder_session = contender(&ensemble).await;
    let waiter_session = contender(&ensemble).await;

    let mut holder = holder_session.lock();
    assert!(holder.try_acquire("item").await?);

    let mut waiter = waiter_session.lock();
    let t = tokio::spawn(async move { waiter.acquire("item", Duration::from_secs(30)).await });
    wait_until(|| ensemble.watch_count(&marker("item", 0)) == 1).await;

    waiter_session.close().await?;
    assert!(t.await?.unwrap_err().is_interrupted());
    assert_eq!(ensemble.children("/locks/item"), vec!["lock-0000000000"]);
    Ok(())
}

#[tokio::test]
/// own marker removed by someone else while waiting
async fn test_missing_own_marker_is_protocol_violation() -> Result<()> {
    let ensemble = MemoryEnsemble::new();
    let holder_session = contender(&ensemble).await;
    let waiter_session = contender(&ensemble).await;

    let mut holder = holder_session.lock();
    assert!(holder.try_acquire("item").await?);

    let mut waiter = waiter_session.lock();
    let t = tokio::spawn(async move {
        let res = waiter.acquire("item", Duration::from_secs(30)).await;
        (waiter, res)
    });
    wait_until(|| ensemble.watch_count(&marker("item", 0)) == 1).await;

    holder_session.client().delete(&marker("item", 1)).await?;
    holder.release().await?;

    let (waiter, res) = t.await?;
    assert!(res.unwrap_err().is_protocol_violation());
    assert_eq!(waiter.state(), LockState::Failed);
    assert!(ensemble.children("/locks/item").is_empty());
    Ok(())
}
