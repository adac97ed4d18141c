use clap::Parser;

use lock_loadtest::{Cli, LoadTestConfig, run_load_test};

fn config(args: &[&str]) -> LoadTestConfig {
    let cli = Cli::try_parse_from(["lock-loadtest"].iter().chain(args)).expect("cli parse");
    LoadTestConfig::try_from(cli).expect("config parse")
}

#[tokio::test]
async fn contention_smoke() {
    let config = config(&["--clients", "10", "--hold-ms", "1"]);
    let report = run_load_test(config).await.expect("run report");

    assert!(report.passed, "{}", report.human_summary());
    assert_eq!(report.clients.len(), 10);
    assert_eq!(report.totals.released, 10);
    assert_eq!(report.totals.leftover_markers, 0);

    let mut seqs = report
        .clients
        .iter()
        .filter_map(|c| c.sequence)
        .collect::<Vec<_>>();
    seqs.sort_unstable();
    assert_eq!(seqs, (0..10).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crashing_holders_still_hand_over() {
    let config = config(&[
        "--clients",
        "12",
        "--hold-ms",
        "1",
        "--crash-rate",
        "0.5",
        "--seed",
        "42",
    ]);
    let report = run_load_test(config).await.expect("run report");

    assert!(report.passed, "{}", report.human_summary());
    assert_eq!(report.totals.released + report.totals.crashed, 12);
    assert_eq!(report.totals.leftover_markers, 0);
}

#[tokio::test]
async fn zero_timeout_lets_later_clients_give_up() {
    let config = config(&["--clients", "4", "--hold-ms", "20", "--timeout-ms", "0"]);
    let report = run_load_test(config).await.expect("run report");

    // nobody waits, so every attempt behind the first holder times out
    assert!(report.totals.released >= 1);
    assert_eq!(report.totals.released + report.totals.timed_out, 4);
    assert_eq!(report.totals.failed, 0);
    assert_eq!(report.totals.leftover_markers, 0);
    assert!(report.passed, "{}", report.human_summary());
}
