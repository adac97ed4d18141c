use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lock_coordination::{LockSession, MemoryEnsemble, MemorySession};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::LoadTestConfig;
use crate::report::{
    ClientOutcome, ClientResult, LoadTestReport, MetricsSnapshot, RunConfigSnapshot, RuntimeStats,
    Totals,
};
use crate::validation;

pub async fn run(config: LoadTestConfig) -> Result<LoadTestReport> {
    let started = Instant::now();
    let ensemble = MemoryEnsemble::new();
    let config = Arc::new(config);
    let crash_plan = crash_plan(config.seed, config.crash_rate, config.clients);
    let ramp_delay = ramp_delay(config.ramp_per_sec);

    info!(
        clients = config.clients,
        parent = %config.lock_parent(),
        crash_rate = config.crash_rate,
        "starting contention run"
    );

    let mut tasks = JoinSet::new();
    for (client_index, crash) in crash_plan.into_iter().enumerate() {
        let (client, notifications) = ensemble.connect();
        let session = LockSession::connect(client, notifications, config.lock.clone())
            .await
            .with_context(|| format!("connect session for client {client_index}"))?;

        let ensemble = ensemble.clone();
        let config = Arc::clone(&config);
        tasks.spawn(async move {
            run_single_client(client_index, session, &ensemble, crash, &config, started).await
        });

        if let Some(delay) = ramp_delay {
            tokio::time::sleep(delay).await;
        }
    }

    let mut clients = Vec::with_capacity(config.clients);
    while let Some(joined) = tasks.join_next().await {
        let result = joined.context("client task join failed")?;
        clients.push(result);
    }
    clients.sort_by_key(|client| client.client_index);

    let leftover = ensemble.children(&config.lock_parent());
    if !leftover.is_empty() {
        warn!(markers = ?leftover, "markers left behind after the run");
    }

    let totals = compute_totals(&clients, config.clients, leftover.len());
    let stats = compute_stats(&clients, started.elapsed());
    let validation = validation::run_validations(&clients, &leftover);
    let passed = validation.passed;
    info!(passed, duration_ms = stats.duration_ms, "contention run finished");

    Ok(LoadTestReport {
        config: RunConfigSnapshot::from(config.as_ref()),
        passed,
        totals,
        stats,
        metrics: MetricsSnapshot::collect(),
        validation,
        clients,
    })
}

async fn run_single_client(
    client_index: usize,
    session: LockSession<MemorySession>,
    ensemble: &MemoryEnsemble,
    crash: bool,
    config: &LoadTestConfig,
    started: Instant,
) -> ClientResult {
    let session_id = session.client().id();
    let mut result = ClientResult {
        client_index,
        session_id,
        outcome: ClientOutcome::Failed,
        sequence: None,
        granted_at_us: None,
        released_at_us: None,
        wait_ms: 0,
        error: None,
    };

    let mut lock = session.lock();
    let wait_started = Instant::now();
    let acquired = lock.acquire(&config.key, config.timeout()).await;
    result.wait_ms = wait_started.elapsed().as_millis();

    match acquired {
        Ok(true) => {
            result.granted_at_us = Some(started.elapsed().as_micros());
            result.sequence = lock.sequence();
            tokio::time::sleep(config.hold()).await;
            result.released_at_us = Some(started.elapsed().as_micros());

            if crash {
                debug!(client_index, session_id, "crashing holder");
                ensemble.expire_session(session_id);
                result.outcome = ClientOutcome::Crashed;
            } else {
                match lock.release().await {
                    Ok(_) => result.outcome = ClientOutcome::Released,
                    Err(err) => result.error = Some(err.to_string()),
                }
            }
        }
        Ok(false) => {
            debug!(client_index, "gave up waiting");
            result.outcome = ClientOutcome::TimedOut;
        }
        Err(err) => {
            warn!(client_index, error = %err, "lock attempt failed");
            result.error = Some(err.to_string());
        }
    }

    drop(lock);
    if let Err(err) = session.close().await {
        debug!(client_index, error = %err, "session close failed");
    }
    result
}

/// Which clients crash instead of releasing, reproducible per seed.
fn crash_plan(seed: u64, crash_rate: f64, clients: usize) -> Vec<bool> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..clients).map(|_| rng.gen_bool(crash_rate)).collect()
}

fn ramp_delay(ramp_per_sec: usize) -> Option<Duration> {
    if ramp_per_sec == 0 {
        None
    } else {
        Some(Duration::from_secs_f64(1.0 / ramp_per_sec as f64))
    }
}

fn compute_totals(clients: &[ClientResult], planned_clients: usize, leftover: usize) -> Totals {
    let count = |outcome: ClientOutcome| clients.iter().filter(|c| c.outcome == outcome).count();
    Totals {
        planned_clients,
        completed_clients: clients.len(),
        released: count(ClientOutcome::Released),
        crashed: count(ClientOutcome::Crashed),
        timed_out: count(ClientOutcome::TimedOut),
        failed: count(ClientOutcome::Failed),
        leftover_markers: leftover,
    }
}

fn compute_stats(clients: &[ClientResult], duration: Duration) -> RuntimeStats {
    let duration_secs = duration.as_secs_f64().max(1e-9);
    let mut waits = clients
        .iter()
        .filter(|c| c.was_granted())
        .map(|c| c.wait_ms)
        .collect::<Vec<_>>();
    waits.sort_unstable();

    RuntimeStats {
        duration_ms: duration.as_millis(),
        grants_per_sec: waits.len() as f64 / duration_secs,
        wait_p50_ms: percentile(&waits, 0.50),
        wait_p95_ms: percentile(&waits, 0.95),
        wait_p99_ms: percentile(&waits, 0.99),
    }
}

fn percentile(values: &[u128], p: f64) -> Option<u128> {
    if values.is_empty() {
        return None;
    }
    let index = ((values.len() - 1) as f64 * p).round() as usize;
    values.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crash_plan_is_seeded() {
        assert_eq!(crash_plan(7, 0.5, 32), crash_plan(7, 0.5, 32));
        assert!(crash_plan(1, 0.0, 16).iter().all(|c| !c));
        assert!(crash_plan(1, 1.0, 16).iter().all(|c| *c));
    }

    #[test]
    fn percentile_picks_nearest_rank() {
        assert_eq!(percentile(&[], 0.5), None);
        assert_eq!(percentile(&[1, 2, 3, 4, 5], 0.5), Some(3));
        assert_eq!(percentile(&[1, 2, 3, 4, 5], 0.99), Some(5));
    }
}
