// ABOUTME: Prometheus metrics helpers for session lifecycle, polling, and relay activity
// ABOUTME: Thin wrappers so call sites stay one-liners and metric names live in one place

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and describe all metrics.
/// Call once at startup; the handle renders the /metrics text format.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    describe_counter!(
        "tether_sessions_started_total",
        "Desk session attempts initiated by visitors"
    );
    describe_counter!(
        "tether_sessions_established_total",
        "Desk sessions accepted by a human agent"
    );
    describe_counter!(
        "tether_sessions_failed_total",
        "Desk session attempts that ended without an agent"
    );
    describe_counter!("tether_polls_total", "Long-poll round trips by outcome");
    describe_counter!(
        "tether_messages_relayed_total",
        "Messages relayed between visitor room and desk, by direction"
    );
    describe_counter!(
        "tether_idle_timeouts_fired_total",
        "Chats closed by the inactivity timeout"
    );
    describe_counter!(
        "tether_handoff_errors_total",
        "Non-fatal host platform failures during hand-off"
    );
    describe_gauge!("tether_active_sessions", "Live desk sessions right now");

    Ok(handle)
}

pub fn record_session_started() {
    counter!("tether_sessions_started_total").increment(1);
}

pub fn record_session_established() {
    counter!("tether_sessions_established_total").increment(1);
}

pub fn record_session_failed(reason: &str) {
    counter!("tether_sessions_failed_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_poll(outcome: &'static str) {
    counter!("tether_polls_total", "outcome" => outcome).increment(1);
}

pub fn record_message_relayed(direction: &'static str) {
    counter!("tether_messages_relayed_total", "direction" => direction).increment(1);
}

pub fn record_idle_timeout_fired() {
    counter!("tether_idle_timeouts_fired_total").increment(1);
}

pub fn record_handoff_error(stage: &'static str) {
    counter!("tether_handoff_errors_total", "stage" => stage).increment(1);
}

pub fn set_active_sessions(count: u64) {
    gauge!("tether_active_sessions").set(count as f64);
}
