#![allow(dead_code)]

use std::time::Duration;

use config::LockConfig;
use lock_coordination::{LockSession, MemoryEnsemble, MemorySession};

pub type Session = LockSession<MemorySession>;

/// One contender process: its own session on the shared ensemble.
pub async fn contender(ensemble: &MemoryEnsemble) -> Session {
    contender_with(ensemble, LockConfig::default()).await
}

pub async fn contender_with(ensemble: &MemoryEnsemble, config: LockConfig) -> Session {
    let (client, notifications) = ensemble.connect();
    LockSession::connect(client, notifications, config)
        .await
        .expect("session connects")
}

pub fn marker(key: &str, seq: u64) -> String {
    format!("/locks/{key}/lock-{seq:010}")
}

/// Poll `cond` until it holds, yielding to other tasks in between.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Give spawned tasks a chance to make progress.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
