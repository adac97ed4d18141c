use crate::report::{ClientOutcome, ClientResult, ValidationCheck, ValidationSummary};

pub fn run_validations(clients: &[ClientResult], leftover_markers: &[String]) -> ValidationSummary {
    let mut checks = Vec::new();

    let overlaps = overlapping_holds(clients);
    checks.push(ValidationCheck {
        name: "mutual_exclusion".to_string(),
        passed: overlaps.is_empty(),
        details: if overlaps.is_empty() {
            "No overlapping hold intervals".to_string()
        } else {
            format!("Overlapping holds: {overlaps}")
        },
    });

    let inversions = fifo_inversions(clients);
    checks.push(ValidationCheck {
        name: "fifo_order".to_string(),
        passed: inversions.is_empty(),
        details: if inversions.is_empty() {
            "Grants followed marker sequence order".to_string()
        } else {
            format!("Out-of-order grants: {inversions}")
        },
    });

    let failed = clients
        .iter()
        .filter(|c| c.outcome == ClientOutcome::Failed)
        .map(|c| c.client_index.to_string())
        .collect::<Vec<_>>();
    checks.push(ValidationCheck {
        name: "no_failed_clients".to_string(),
        passed: failed.is_empty(),
        details: if failed.is_empty() {
            format!("{} clients finished without error", clients.len())
        } else {
            format!("Failed clients: {}", failed.join(", "))
        },
    });

    checks.push(ValidationCheck {
        name: "no_leftover_markers".to_string(),
        passed: leftover_markers.is_empty(),
        details: if leftover_markers.is_empty() {
            "Lock parent is empty".to_string()
        } else {
            format!("Markers left behind: {}", leftover_markers.join(", "))
        },
    });

    let passed = checks.iter().all(|check| check.passed);
    ValidationSummary { passed, checks }
}

/// Granted clients ordered by grant instant.
fn holds_by_grant(clients: &[ClientResult]) -> Vec<&ClientResult> {
    let mut holds = clients
        .iter()
        .filter(|c| c.was_granted())
        .collect::<Vec<_>>();
    holds.sort_by_key(|c| c.granted_at_us);
    holds
}

fn overlapping_holds(clients: &[ClientResult]) -> String {
    holds_by_grant(clients)
        .windows(2)
        .filter_map(|pair| {
            let (prev, next) = (pair[0], pair[1]);
            match (prev.released_at_us, next.granted_at_us) {
                (Some(released), Some(granted)) if released <= granted => None,
                _ => Some(format!(
                    "client {} (released {:?}us) / client {} (granted {:?}us)",
                    prev.client_index, prev.released_at_us, next.client_index, next.granted_at_us
                )),
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn fifo_inversions(clients: &[ClientResult]) -> String {
    holds_by_grant(clients)
        .windows(2)
        .filter_map(|pair| {
            let (prev, next) = (pair[0], pair[1]);
            match (prev.sequence, next.sequence) {
                (Some(a), Some(b)) if a < b => None,
                _ => Some(format!(
                    "client {} (seq {:?}) before client {} (seq {:?})",
                    prev.client_index, prev.sequence, next.client_index, next.sequence
                )),
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}
