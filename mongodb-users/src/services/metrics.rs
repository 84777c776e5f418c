//! Metrics for mongodb-users.
//!
//! Recorded through the `metrics` facade; they are no-ops until the host
//! process installs a recorder.

use std::time::Duration;

/// Record one lifecycle operation and how long it took.
pub fn record_operation(operation: &'static str, outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!(
        "user_reconcile_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("user_reconcile_duration_seconds", "operation" => operation)
        .record(elapsed.as_secs_f64());
}

/// Record one admin command sent to the server.
pub fn record_command(command: &'static str, outcome: &'static str) {
    ::metrics::counter!("user_commands_total", "command" => command, "outcome" => outcome)
        .increment(1);
}
