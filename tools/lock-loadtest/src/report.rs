use lock_coordination::metrics;
use serde::{Deserialize, Serialize};

use crate::config::LoadTestConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientOutcome {
    /// granted, held, released
    Released,
    /// granted, then the session was expired instead of releasing
    Crashed,
    /// gave up after the wait deadline
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientResult {
    pub client_index: usize,
    pub session_id: u64,
    pub outcome: ClientOutcome,
    pub sequence: Option<u64>,
    /// microseconds since the run started
    pub granted_at_us: Option<u128>,
    pub released_at_us: Option<u128>,
    pub wait_ms: u128,
    pub error: Option<String>,
}

impl ClientResult {
    pub fn was_granted(&self) -> bool {
        matches!(
            self.outcome,
            ClientOutcome::Released | ClientOutcome::Crashed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub passed: bool,
    pub checks: Vec<ValidationCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub clients: usize,
    pub key: String,
    pub lock_parent: String,
    pub hold_ms: u64,
    pub timeout_ms: u64,
    pub ramp_per_sec: usize,
    pub crash_rate: f64,
    pub seed: u64,
}

impl From<&LoadTestConfig> for RunConfigSnapshot {
    fn from(config: &LoadTestConfig) -> Self {
        Self {
            clients: config.clients,
            key: config.key.clone(),
            lock_parent: config.lock_parent(),
            hold_ms: config.hold_ms,
            timeout_ms: config.timeout_ms,
            ramp_per_sec: config.ramp_per_sec,
            crash_rate: config.crash_rate,
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Totals {
    pub planned_clients: usize,
    pub completed_clients: usize,
    pub released: usize,
    pub crashed: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub leftover_markers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub duration_ms: u128,
    pub grants_per_sec: f64,
    pub wait_p50_ms: Option<u128>,
    pub wait_p95_ms: Option<u128>,
    pub wait_p99_ms: Option<u128>,
}

/// Process-wide lock counters at the end of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub granted: u64,
    pub timed_out: u64,
    pub failed: u64,
    pub released: u64,
    pub wakeups: u64,
    pub markers_abandoned: u64,
}

impl MetricsSnapshot {
    pub fn collect() -> Self {
        Self {
            granted: metrics::LOCK_GRANTED.get(),
            timed_out: metrics::LOCK_TIMED_OUT.get(),
            failed: metrics::LOCK_FAILED.get(),
            released: metrics::LOCK_RELEASED.get(),
            wakeups: metrics::LOCK_WAKEUPS.get(),
            markers_abandoned: metrics::LOCK_MARKERS_ABANDONED.get(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestReport {
    pub config: RunConfigSnapshot,
    pub passed: bool,
    pub totals: Totals,
    pub stats: RuntimeStats,
    pub metrics: MetricsSnapshot,
    pub validation: ValidationSummary,
    pub clients: Vec<ClientResult>,
}

impl LoadTestReport {
    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str("lock contention report\n");
        output.push_str(&format!(
            "status: {}\n",
            if self.passed { "PASS" } else { "FAIL" }
        ));
        output.push_str(&format!(
            "lock: {} (hold={}ms timeout={}ms crash_rate={:.2})\n",
            self.config.lock_parent,
            self.config.hold_ms,
            self.config.timeout_ms,
            self.config.crash_rate
        ));
        output.push_str(&format!(
            "clients: planned={}, completed={}\n",
            self.totals.planned_clients, self.totals.completed_clients
        ));
        output.push_str(&format!(
            "outcomes: released={}, crashed={}, timed_out={}, failed={} | leftover markers={}\n",
            self.totals.released,
            self.totals.crashed,
            self.totals.timed_out,
            self.totals.failed,
            self.totals.leftover_markers
        ));
        output.push_str(&format!(
            "timing: duration={}ms grants={:.2}/s wait p50={:?}ms p95={:?}ms p99={:?}ms\n",
            self.stats.duration_ms,
            self.stats.grants_per_sec,
            self.stats.wait_p50_ms,
            self.stats.wait_p95_ms,
            self.stats.wait_p99_ms
        ));
        output.push_str(&format!(
            "metrics: wakeups={}, markers_abandoned={}\n",
            self.metrics.wakeups, self.metrics.markers_abandoned
        ));

        for check in &self.validation.checks {
            output.push_str(&format!(
                "check [{}] {}: {}\n",
                if check.passed { "PASS" } else { "FAIL" },
                check.name,
                check.details
            ));
        }
        output
    }
}
