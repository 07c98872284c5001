//! Business metrics for meet registration.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `registration_admissions_total{decision}` - Admissions by gate decision
//! - `registration_rejections_total{reason}` - Admissions refused by the gate
//! - `registration_conflicts_total{operation}` - Attempts that lost a commit race
//! - `registration_transitions_total{from, to}` - Committed status changes
//! - `registration_payment_changes_total{to}` - Committed payment status changes
//! - `registration_weigh_ins_total{kind}` - First recordings and corrections
//! - `registration_notification_failures_total{kind}` - Notifier calls that failed
//!
//! ## Gauges
//! - `registration_seats_remaining{event_id}` - Free seats after the last seat move
//!
//! ## Histograms
//! - `registration_operation_duration_seconds{operation}` - End-to-end operation latency

use crate::lifecycle::{PaymentStatus, RegistrationStatus};
use crate::types::EventId;
use crate::validation::AdmissionDecision;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use std::time::Duration;

/// Register descriptions for all business metrics.
///
/// Call once at startup, after the recorder is installed.
pub fn register_business_metrics() {
    describe_counter!(
        "registration_admissions_total",
        "Admissions by gate decision (admit, waitlist, already_registered)"
    );
    describe_counter!(
        "registration_rejections_total",
        "Admissions refused by the gate, by reason"
    );
    describe_counter!(
        "registration_conflicts_total",
        "Operation attempts that lost a commit race and were retried or surfaced"
    );
    describe_counter!(
        "registration_transitions_total",
        "Committed registration status changes"
    );
    describe_counter!(
        "registration_payment_changes_total",
        "Committed payment status changes"
    );
    describe_counter!(
        "registration_weigh_ins_total",
        "Weigh-ins recorded (first or correction)"
    );
    describe_counter!(
        "registration_notification_failures_total",
        "Notifier calls that failed"
    );
    describe_gauge!(
        "registration_seats_remaining",
        "Free seats of an event after its latest seat-moving commit"
    );
    describe_histogram!(
        "registration_operation_duration_seconds",
        "End-to-end latency of engine operations, retries included"
    );

    tracing::info!("Business metrics registered");
}

/// Record a committed (or idempotent) admission.
pub fn record_admission(decision: AdmissionDecision) {
    metrics::counter!("registration_admissions_total", "decision" => decision.as_str()).increment(1);
}

/// Record an admission refused by the gate.
pub fn record_rejection(reason: &'static str) {
    metrics::counter!("registration_rejections_total", "reason" => reason).increment(1);
}

/// Record a lost commit race.
pub fn record_conflict(operation: &'static str) {
    metrics::counter!("registration_conflicts_total", "operation" => operation).increment(1);
}

/// Record a committed status change.
pub fn record_transition(from: RegistrationStatus, to: RegistrationStatus) {
    metrics::counter!(
        "registration_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// Record a committed payment status change.
pub fn record_payment_change(to: PaymentStatus) {
    metrics::counter!("registration_payment_changes_total", "to" => to.as_str()).increment(1);
}

/// Record a weigh-in; `correction` distinguishes re-recordings.
pub fn record_weigh_in(correction: bool) {
    let kind = if correction { "correction" } else { "first" };
    metrics::counter!("registration_weigh_ins_total", "kind" => kind).increment(1);
}

/// Record a failed notifier call.
pub fn record_notification_failure(kind: &'static str) {
    metrics::counter!("registration_notification_failures_total", "kind" => kind).increment(1);
}

/// Update the free-seat gauge for an event.
pub fn update_seats_remaining(event_id: EventId, remaining: u32) {
    metrics::gauge!("registration_seats_remaining", "event_id" => event_id.to_string())
        .set(f64::from(remaining));
}

/// Record how long an engine operation took.
pub fn record_operation_duration(operation: &'static str, duration: Duration) {
    metrics::histogram!("registration_operation_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}
