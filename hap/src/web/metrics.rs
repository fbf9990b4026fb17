//! Prometheus metrics definitions and registration.
//!
//! This module defines all the metrics that are exposed via the `/metrics` endpoint.
//! Recording without an installed recorder is a no-op, so the helpers are
//! safe to call from unit tests.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics exporter and register all metric descriptions.
///
/// Returns a handle that can be used to render the metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    // Register metric descriptions
    register_metric_descriptions();

    Ok(handle)
}

/// Register descriptions for all metrics.
fn register_metric_descriptions() {
    // Bridge metrics
    describe_gauge!(
        "nest_hub_info",
        "Information about the bridge (always 1, labels contain version info)"
    );
    describe_gauge!(
        "nest_hub_uptime_seconds",
        "Time in seconds since the bridge started"
    );
    describe_counter!(
        "nest_hub_bootstrap_attempts_total",
        "Total number of device listing attempts during bootstrap"
    );

    // Event metrics
    describe_counter!(
        "nest_hub_messages_total",
        "Total number of subscription messages, by acknowledgement"
    );
    describe_counter!(
        "nest_hub_receive_failures_total",
        "Total number of failed subscription receive calls"
    );
    describe_counter!(
        "nest_hub_reconciled_changes_total",
        "Total number of thermostat fields changed by reconciliation"
    );

    // Command metrics
    describe_counter!(
        "nest_hub_commands_total",
        "Total number of commands sent to the thermostat, by command and result"
    );
}

/// Metrics helper functions for easy recording.
pub struct Metrics;

impl Metrics {
    /// Record bridge uptime based on start time.
    pub fn set_uptime(start_time: Instant) {
        let uptime = start_time.elapsed().as_secs_f64();
        gauge!("nest_hub_uptime_seconds").set(uptime);
    }

    /// Set bridge info metric with version labels.
    pub fn set_bridge_info(version: &str) {
        gauge!("nest_hub_info", "version" => version.to_string()).set(1.0);
    }

    pub fn inc_bootstrap_attempts() {
        counter!("nest_hub_bootstrap_attempts_total").increment(1);
    }

    pub fn inc_messages(acked: bool) {
        let ack = if acked { "ack" } else { "nack" };
        counter!("nest_hub_messages_total", "result" => ack).increment(1);
    }

    pub fn inc_receive_failures() {
        counter!("nest_hub_receive_failures_total").increment(1);
    }

    pub fn inc_reconciled_changes(changes: usize) {
        counter!("nest_hub_reconciled_changes_total").increment(changes as u64);
    }

    /// Count a command by its cloud name.
    pub fn inc_commands(command: &'static str, success: bool) {
        let result = if success { "success" } else { "failure" };
        counter!("nest_hub_commands_total", "command" => command, "result" => result).increment(1);
    }
}
