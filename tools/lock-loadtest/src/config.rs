use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use config::LockConfig;
use lock_coordination::marker;
use serde::{Deserialize, Serialize};

pub const DEFAULT_KEY: &str = "contended";
pub const DEFAULT_HOLD_MS: u64 = 5;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RAMP_PER_SEC: usize = 0;
pub const DEFAULT_CRASH_RATE: f64 = 0.0;

/// log as "json", "pretty" or "standard" (unstructured)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Standard,
    Json,
    Pretty,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "lock-loadtest",
    about = "Contention harness for the sequential lock"
)]
pub struct Cli {
    #[arg(long)]
    pub clients: usize,
    #[arg(long, default_value = DEFAULT_KEY)]
    pub key: String,

    #[arg(long, default_value_t = DEFAULT_HOLD_MS)]
    pub hold_ms: u64,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,
    #[arg(long, default_value_t = DEFAULT_RAMP_PER_SEC)]
    pub ramp_per_sec: usize,
    /// fraction of holders whose session is expired instead of releasing
    #[arg(long, default_value_t = DEFAULT_CRASH_RATE)]
    pub crash_rate: f64,
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    #[arg(long)]
    pub json: bool,
    /// lock config file (JSON or YAML)
    #[arg(long, env = "LOCK_CONFIG")]
    pub config_path: Option<PathBuf>,

    /// tracing filter directives
    #[arg(long, env = "LOCK_LOG", default_value = "info")]
    pub log: String,
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Standard)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    pub clients: usize,
    pub key: String,
    pub hold_ms: u64,
    pub timeout_ms: u64,
    pub ramp_per_sec: usize,
    pub crash_rate: f64,
    pub seed: u64,
    pub json: bool,
    pub lock: LockConfig,
}

impl LoadTestConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parent node every client's marker is created under.
    pub fn lock_parent(&self) -> String {
        marker::lock_parent(&self.lock.locks_root(), &self.key)
    }
}

impl TryFrom<Cli> for LoadTestConfig {
    type Error = anyhow::Error;

    fn try_from(args: Cli) -> Result<Self> {
        if args.clients == 0 {
            bail!("--clients must be greater than 0");
        }
        if !(0.0..=1.0).contains(&args.crash_rate) {
            bail!("--crash-rate must be between 0.0 and 1.0");
        }
        marker::validate_key(&args.key).context("--key")?;

        let lock = match &args.config_path {
            Some(path) => LockConfig::parse(path)
                .with_context(|| format!("failed to load lock config `{}`", path.display()))?,
            None => LockConfig::default(),
        };

        Ok(Self {
            clients: args.clients,
            key: args.key,
            hold_ms: args.hold_ms,
            timeout_ms: args.timeout_ms,
            ramp_per_sec: args.ramp_per_sec,
            crash_rate: args.crash_rate,
            seed: args.seed,
            json: args.json,
            lock,
        })
    }
}
