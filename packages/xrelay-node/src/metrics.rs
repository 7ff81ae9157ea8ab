//! Prometheus metrics for the XRelay node
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};

use crate::types::RelayOutcome;

lazy_static! {
    // Source side
    pub static ref ENVELOPES_OBSERVED: CounterVec = register_counter_vec!(
        "xrelay_envelopes_observed_total",
        "Total number of envelopes decoded from source logs",
        &["chain"]
    ).unwrap();

    pub static ref DECODE_ERRORS: CounterVec = register_counter_vec!(
        "xrelay_decode_errors_total",
        "Receipts that failed to decode (watcher halts on these)",
        &["chain"]
    ).unwrap();

    pub static ref SOURCE_HEAD: GaugeVec = register_gauge_vec!(
        "xrelay_source_head_block",
        "Latest head block seen on the source chain",
        &["chain"]
    ).unwrap();

    pub static ref SOURCE_CURSOR: GaugeVec = register_gauge_vec!(
        "xrelay_source_cursor_block",
        "Last fully processed source block",
        &["chain"]
    ).unwrap();

    // Relay side
    pub static ref RELAY_ATTEMPTS: CounterVec = register_counter_vec!(
        "xrelay_relay_attempts_total",
        "Submission attempts to the destination messenger",
        &["outcome"]
    ).unwrap();

    pub static ref RELAY_OUTCOMES: CounterVec = register_counter_vec!(
        "xrelay_relay_outcomes_total",
        "Envelopes reaching a terminal outcome",
        &["chain", "outcome"]
    ).unwrap();

    pub static ref ESCALATIONS: CounterVec = register_counter_vec!(
        "xrelay_escalations_total",
        "Envelopes whose retry budget was exhausted",
        &["chain"]
    ).unwrap();

    pub static ref CONFIRMATION_TIMEOUTS: CounterVec = register_counter_vec!(
        "xrelay_confirmation_timeouts_total",
        "Envelopes waiting on confirmations longer than the alarm threshold",
        &["chain"]
    ).unwrap();

    pub static ref HELD_ENVELOPES: Gauge = register_gauge!(
        "xrelay_held_envelopes",
        "Envelopes held on a configuration error (unmapped token, unroutable topic)"
    ).unwrap();

    pub static ref IN_FLIGHT: Gauge = register_gauge!(
        "xrelay_in_flight_submissions",
        "Lanes with a submission in progress"
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "xrelay_errors_total",
        "Total number of internal errors",
        &["component"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "xrelay_up",
        "Whether the relay node is up and running"
    ).unwrap();
}

/// Record envelopes decoded from one chain
pub fn record_observed(chain_id: u64, count: usize) {
    ENVELOPES_OBSERVED
        .with_label_values(&[&chain_id.to_string()])
        .inc_by(count as f64);
}

pub fn record_decode_error(chain_id: u64) {
    DECODE_ERRORS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_source_head(chain_id: u64, block: u64) {
    SOURCE_HEAD
        .with_label_values(&[&chain_id.to_string()])
        .set(block as f64);
}

pub fn record_source_cursor(chain_id: u64, block: u64) {
    SOURCE_CURSOR
        .with_label_values(&[&chain_id.to_string()])
        .set(block as f64);
}

pub fn record_attempt(outcome: &RelayOutcome) {
    RELAY_ATTEMPTS.with_label_values(&[outcome.as_str()]).inc();
}

/// Record a terminal outcome ("applied", "rejected_duplicate", "rejected_invalid")
pub fn record_outcome(chain_id: u64, outcome: &str) {
    RELAY_OUTCOMES
        .with_label_values(&[&chain_id.to_string(), outcome])
        .inc();
}

pub fn record_escalation(chain_id: u64) {
    ESCALATIONS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_confirmation_timeout(chain_id: u64) {
    CONFIRMATION_TIMEOUTS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn set_held(count: usize) {
    HELD_ENVELOPES.set(count as f64);
}

pub fn set_in_flight(count: usize) {
    IN_FLIGHT.set(count as f64);
}

pub fn record_error(component: &str) {
    ERRORS.with_label_values(&[component]).inc();
}

pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}
