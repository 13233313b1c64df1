//! Prometheus metrics for the orchestration core
//!
//! - Operation timing (fed by the activity recorder's `end_metric`)
//! - Queue task outcomes
//! - Retry attempts and verification challenge outcomes
//! - Invitation outcomes

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramVec, TextEncoder, register_counter_vec, register_histogram_vec,
};
use std::time::Duration;

lazy_static! {
    /// Duration of named operations (seconds)
    pub static ref OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "outreach_operation_duration_seconds",
        "Duration of timed operations in seconds",
        &["name", "result"],  // result: "success" or "failure"
        vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    /// Tasks executed by the rate-limited queue
    pub static ref QUEUE_TASKS_TOTAL: CounterVec = register_counter_vec!(
        "outreach_queue_tasks_total",
        "Total number of tasks executed by the rate-limited queue",
        &["result"]
    )
    .unwrap();

    /// Failed attempts that were followed by another attempt
    pub static ref RETRY_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "outreach_retry_attempts_total",
        "Total number of retried operation attempts",
        &["operation", "reason"]  // reason: "challenge_resolved" or "backoff"
    )
    .unwrap();

    /// Verification challenges seen
    pub static ref CHALLENGES_TOTAL: CounterVec = register_counter_vec!(
        "outreach_challenges_total",
        "Total number of verification challenges by kind and outcome",
        &["kind", "status"]
    )
    .unwrap();

    /// Invitation outcomes
    pub static ref INVITATIONS_TOTAL: CounterVec = register_counter_vec!(
        "outreach_invitations_total",
        "Total number of creator invitations attempted",
        &["result"]  // "sent" or "failed"
    )
    .unwrap();
}

fn result_label(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

pub fn observe_operation(name: &str, success: bool, duration: Duration) {
    OPERATION_DURATION_SECONDS
        .with_label_values(&[name, result_label(success)])
        .observe(duration.as_secs_f64());
}

pub fn record_queue_task(success: bool) {
    QUEUE_TASKS_TOTAL
        .with_label_values(&[result_label(success)])
        .inc();
}

pub fn record_retry(operation: &str, reason: &str) {
    RETRY_ATTEMPTS_TOTAL
        .with_label_values(&[operation, reason])
        .inc();
}

pub fn record_challenge(kind: &str, status: &str) {
    CHALLENGES_TOTAL.with_label_values(&[kind, status]).inc();
}

pub fn record_invitation(sent: bool) {
    INVITATIONS_TOTAL
        .with_label_values(&[if sent { "sent" } else { "failed" }])
        .inc();
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
