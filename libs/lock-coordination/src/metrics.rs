//! Lock coordination metrics.
//!
//! Metrics are lazily initialized on first access via `lazy_static!` and
//! registered in the default prometheus registry.
//!
//! # Note
//! Metric registration failures are fatal (using `.unwrap()`): a duplicate or
//! malformed metric is a programming error that should surface at startup.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};

lazy_static! {
    /// Count of lock acquisitions granted
    pub static ref LOCK_GRANTED: IntCounter = register_int_counter!(
        "lock_granted",
        "count of lock acquisitions granted"
    ).unwrap();

    /// Count of attempts that gave up after their wait deadline
    pub static ref LOCK_TIMED_OUT: IntCounter = register_int_counter!(
        "lock_timed_out",
        "count of lock acquisitions that timed out while waiting"
    ).unwrap();

    /// Count of attempts that failed (connection, protocol or interruption)
    pub static ref LOCK_FAILED: IntCounter = register_int_counter!(
        "lock_failed",
        "count of lock acquisitions that failed with an error"
    ).unwrap();

    /// Count of explicit releases of a held lock
    pub static ref LOCK_RELEASED: IntCounter = register_int_counter!(
        "lock_released",
        "count of held locks released"
    ).unwrap();

    /// Count of predecessor watch fires that woke a waiter
    pub static ref LOCK_WAKEUPS: IntCounter = register_int_counter!(
        "lock_wakeups",
        "count of predecessor watch fires observed by waiting contenders"
    ).unwrap();

    /// Count of own markers deleted after a timeout or interruption
    pub static ref LOCK_MARKERS_ABANDONED: IntCounter = register_int_counter!(
        "lock_markers_abandoned",
        "count of markers removed by failed or abandoned attempts"
    ).unwrap();

    /// Gauge: contenders currently waiting on a predecessor
    pub static ref LOCK_WAITING: IntGauge = register_int_gauge!(
        "lock_waiting",
        "number of contenders currently waiting on a predecessor marker"
    ).unwrap();
}
