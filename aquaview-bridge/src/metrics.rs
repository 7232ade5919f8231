// Aquaview Bridge - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the dashboard bridge.
//!
//! The app loop updates these after every event it handles; `/metrics`
//! renders them with [`encode_metrics`]. Running totals kept by the core
//! are mirrored into counters by advancing them to the new total.

use aquaview::{AggregatorStats, ControlState, LinkStatus, SyncStatus};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_gauge_vec, register_int_counter, register_int_counter_vec, Encoder,
    Gauge, GaugeVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ============================================================
    // Telemetry
    // ============================================================

    /// Samples merged into the rolling windows.
    pub static ref SAMPLES_ACCEPTED: IntCounter = register_int_counter!(
        "aquaview_samples_accepted_total",
        "Sensor samples merged into the rolling windows"
    ).unwrap();

    /// Messages the decoder rejected.
    pub static ref SAMPLES_REJECTED: IntCounter = register_int_counter!(
        "aquaview_samples_rejected_total",
        "Channel messages rejected by the decoder"
    ).unwrap();

    /// Historical records replayed at startup.
    pub static ref HISTORY_REPLAYED: IntCounter = register_int_counter!(
        "aquaview_history_replayed_total",
        "Historical records replayed into the windows"
    ).unwrap();

    /// Latest value per sensor (labeled by sensor field name).
    pub static ref SENSOR_VALUE: GaugeVec = register_gauge_vec!(
        "aquaview_sensor_value",
        "Latest value received per sensor",
        &["sensor"]
    ).unwrap();

    /// Broker link state (1 = live, 0 = loading or faulted).
    pub static ref CHANNEL_CONNECTED: Gauge = register_gauge!(
        "aquaview_channel_connected",
        "Broker link state (1=live, 0=loading or faulted)"
    ).unwrap();

    // ============================================================
    // Control
    // ============================================================

    /// Operator commands (labeled by topic and result).
    pub static ref COMMANDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "aquaview_commands_total",
        "Operator commands by topic and result",
        &["topic", "result"]
    ).unwrap();

    /// Replica sync state (1 = in sync, 0 = pending, -1 = failed).
    pub static ref STORE_SYNC: Gauge = register_gauge!(
        "aquaview_store_sync",
        "Control state replica sync (1=in sync, 0=pending, -1=failed)"
    ).unwrap();

    /// Seconds left on the countdown, 0 when none is active.
    pub static ref COUNTDOWN_SECONDS_LEFT: Gauge = register_gauge!(
        "aquaview_countdown_seconds_left",
        "Seconds left on the countdown"
    ).unwrap();

    /// Countdowns that ran to zero.
    pub static ref COUNTDOWN_COMPLETIONS: IntCounter = register_int_counter!(
        "aquaview_countdown_completions_total",
        "Countdowns that ran to zero"
    ).unwrap();
}

/// Update telemetry metrics from aggregator counters.
pub fn update_telemetry(stats: &AggregatorStats, link: &LinkStatus) {
    advance(&SAMPLES_ACCEPTED, stats.accepted);
    advance(&SAMPLES_REJECTED, stats.rejected);
    advance(&HISTORY_REPLAYED, stats.replayed);
    CHANNEL_CONNECTED.set(if *link == LinkStatus::Live { 1.0 } else { 0.0 });
}

/// Record the latest value of a sensor.
pub fn record_sensor_value(sensor: &str, value: f64) {
    SENSOR_VALUE.with_label_values(&[sensor]).set(value);
}

/// Update control metrics from the store and countdown.
pub fn update_control(state: &ControlState, sync: &SyncStatus, completions: u64) {
    STORE_SYNC.set(match sync {
        SyncStatus::InSync => 1.0,
        SyncStatus::Pending { .. } => 0.0,
        SyncStatus::Failed { .. } => -1.0,
    });
    COUNTDOWN_SECONDS_LEFT.set(state.time_left.unwrap_or(0) as f64);
    advance(&COUNTDOWN_COMPLETIONS, completions);
}

/// Move a counter up to `total`; a lower total leaves it unchanged.
fn advance(counter: &IntCounter, total: u64) {
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}

/// Count one operator command.
pub fn record_command(topic: &str, result: &str) {
    COMMANDS_TOTAL.with_label_values(&[topic, result]).inc();
}

/// Encode all metrics to Prometheus text format.
///
/// An encoding failure yields an empty body rather than a panic.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_control() {
        let state = ControlState {
            hour: "2".to_string(),
            mode: "1".to_string(),
            time_left: Some(7000),
        };
        update_control(&state, &SyncStatus::Failed { reason: "down".to_string() }, 3);

        let output = encode_metrics();
        assert!(output.contains("aquaview_countdown_seconds_left 7000"));
        assert!(output.contains("aquaview_store_sync -1"));
    }

    #[test]
    fn test_counters_only_advance() {
        let counter = IntCounter::new("test_advance_total", "test counter").unwrap();
        advance(&counter, 5);
        assert_eq!(counter.get(), 5);

        advance(&counter, 3);
        assert_eq!(counter.get(), 5);

        advance(&counter, 8);
        assert_eq!(counter.get(), 8);
    }

    #[test]
    fn test_encode_metrics() {
        update_telemetry(&AggregatorStats::default(), &LinkStatus::Live);
        record_sensor_value("tds", 312.0);
        record_command("hour", "published");

        let output = encode_metrics();
        assert!(output.contains("aquaview_channel_connected 1"));
        assert!(output.contains("aquaview_sensor_value{sensor=\"tds\"} 312"));
        assert!(output.contains("aquaview_commands_total"));
        assert!(output.contains("# TYPE aquaview_samples_accepted_total counter"));
    }
}
