// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Aquaview - Water-quality telemetry core
//!
//! Live and historical water-quality readings for a dashboard, plus the
//! operator controls that are pushed to the remote device.
//!
//! ## Key Features
//!
//! - **Rolling windows**: per-topic samples coalesced into multi-sensor rows
//! - **History replay**: stored records seeded ahead of live data
//! - **Control state sync**: whole-record last-writer-wins with a durable replica
//! - **Countdown**: cancellable one-second tick chain with resume after reload
//!
//! The core does no I/O of its own. The message channel and the durable
//! replica are injected ([`MessageChannel`], [`ReplicaStore`]); time is
//! passed in by the host.
//!
//! ## Quick Start
//!
//! ```rust
//! use aquaview::{
//!     CommandPublisher, ControlStateStore, CountdownProcess, DashboardConfig, MemoryChannel,
//!     MemoryStore, TelemetryAggregator,
//! };
//!
//! let config = DashboardConfig::default();
//! let channel = MemoryChannel::new();
//! let replica = MemoryStore::new();
//!
//! // Telemetry
//! let mut aggregator = TelemetryAggregator::new(channel.clone(), replica.clone(), &config);
//! aggregator.start();
//! channel.push_message("sensor/turbidity", b"1.2");
//! channel.push_message("sensor/tds", b"310");
//! aggregator.drain(channel.take_events());
//! assert_eq!(aggregator.short_window().len(), 1);
//!
//! // Controls
//! let mut store = ControlStateStore::open(replica, &config).unwrap();
//! let mut countdown = CountdownProcess::new();
//! let mut publisher = CommandPublisher::new(channel.clone());
//! publisher.publish_hour("2", &mut store, &mut countdown).unwrap();
//! assert_eq!(store.get().time_left, Some(7200));
//! ```
//!
//! ## Modules
//!
//! - [`decoder`]: Raw message to sensor sample
//! - [`window`]: Rolling windows and data points
//! - [`history`]: Historical record parsing
//! - [`aggregator`]: Telemetry aggregation into both windows
//! - [`control`]: Control state and its durable mirror
//! - [`countdown`]: Countdown state machine
//! - [`publisher`]: Operator commands
//! - [`channel`]: Publish/subscribe channel abstraction
//! - [`replica`]: Durable replica abstraction

// Modules
pub mod aggregator;
pub mod channel;
pub mod config;
pub mod control;
pub mod countdown;
pub mod decoder;
pub mod error;
pub mod export;
pub mod health;
pub mod history;
pub mod protocol;
pub mod publisher;
pub mod recovery;
pub mod replica;
pub mod window;

// Re-exports for convenient access
pub use aggregator::{AggregatorStats, LinkStatus, TelemetryAggregator};
pub use channel::{ChannelEvent, ChannelMetrics, MemoryChannel, MessageChannel};
pub use config::{DashboardConfig, LONG_WINDOW_CAPACITY, SHORT_WINDOW_CAPACITY};
pub use control::{ControlPatch, ControlState, ControlStateStore, RemoteApply, SyncStatus};
pub use countdown::{
    format_time_left, CountdownProcess, Reconcile, TickOutcome, TimerHandle, TimerPhase,
};
pub use decoder::SampleDecoder;
pub use error::{AquaError, ChannelError, CommandError, DecodeError, ExportError, Result, StoreError};
pub use export::{export_to_file, to_csv_string, write_csv, LONG_EXPORT_FILE, SHORT_EXPORT_FILE};
pub use health::{HealthCheck, HealthCheckable, HealthMonitor, HealthStatus};
pub use protocol::{SensorKind, SensorSample, HOUR_TOPIC, MODE_TOPIC, SENSOR_TOPICS};
pub use publisher::{CommandOutcome, CommandPublisher};
pub use recovery::{RetrySchedule, RetryStrategy};
pub use replica::{FileStore, MemoryStore, ReplicaChange, ReplicaStore};
pub use window::{DataPoint, MergeOutcome, PointTime, RollingWindow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_basic_flow() {
        let config = DashboardConfig::with_capacities(2, 3);
        let channel = MemoryChannel::new();
        let mut aggregator = TelemetryAggregator::new(channel.clone(), MemoryStore::new(), &config);
        aggregator.start();

        for value in ["1", "2", "3", "4"] {
            channel.push_message("sensor/temperature", value.as_bytes());
        }
        assert_eq!(aggregator.drain(channel.take_events()), 4);
        assert_eq!(aggregator.short_window().len(), 2);
        assert_eq!(aggregator.long_window().len(), 3);
    }
}
