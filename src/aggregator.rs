// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Telemetry aggregator
//!
//! The [`TelemetryAggregator`] bridges the message channel and the
//! historical records of the replica into two [`RollingWindow`]s: a
//! short-horizon one and a long-horizon one. Each accepted sample is
//! merged into both windows independently.
//!
//! Nothing here is fatal. Rejected samples and failed subscriptions are
//! logged and counted; the windows simply do not advance.

use chrono::{DateTime, Local};

use crate::channel::{ChannelEvent, MessageChannel};
use crate::config::DashboardConfig;
use crate::decoder::SampleDecoder;
use crate::health::{HealthCheck, HealthCheckable};
use crate::history;
use crate::protocol::{SensorKind, SensorSample, SENSOR_TOPICS};
use crate::replica::ReplicaStore;
use crate::window::RollingWindow;

/// Connection state as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// Waiting for the first connection
    Loading,
    /// Connected and subscribed
    Live,
    /// Transport reported an error; reconnection is attempted
    Faulted { reason: String },
}

impl LinkStatus {
    /// Short label for displays and metrics
    pub fn label(&self) -> &'static str {
        match self {
            LinkStatus::Loading => "loading",
            LinkStatus::Live => "live",
            LinkStatus::Faulted { .. } => "faulted",
        }
    }
}

/// Aggregator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Samples merged into the windows
    pub accepted: u64,
    /// Messages rejected by the decoder
    pub rejected: u64,
    /// Historical records replayed
    pub replayed: u64,
    /// Subscribe requests that failed
    pub subscribe_failures: u64,
}

/// Owns the short and long telemetry windows
pub struct TelemetryAggregator<C: MessageChannel, H: ReplicaStore> {
    channel: C,
    history: H,
    decoder: SampleDecoder,
    short: RollingWindow,
    long: RollingWindow,
    link: LinkStatus,
    stats: AggregatorStats,
    replayed: bool,
    running: bool,
}

impl<C: MessageChannel, H: ReplicaStore> TelemetryAggregator<C, H> {
    /// Create an aggregator with empty windows
    pub fn new(channel: C, history: H, config: &DashboardConfig) -> Self {
        Self {
            channel,
            history,
            decoder: SampleDecoder::new(),
            short: RollingWindow::new(config.short_capacity),
            long: RollingWindow::new(config.long_capacity),
            link: LinkStatus::Loading,
            stats: AggregatorStats::default(),
            replayed: false,
            running: false,
        }
    }

    /// Subscribe to the sensor topics and replay history once
    pub fn start(&mut self) {
        if !self.channel.is_connected() {
            log::info!("channel not connected, requesting reconnect");
            if let Err(e) = self.channel.reconnect() {
                log::warn!("reconnect request failed: {}", e);
            }
        }

        self.subscribe();
        self.running = true;

        if !self.replayed {
            self.replay_history();
            self.replayed = true;
        }
    }

    fn subscribe(&mut self) -> bool {
        match self.channel.subscribe(&SENSOR_TOPICS) {
            Ok(()) => true,
            Err(e) => {
                self.stats.subscribe_failures += 1;
                log::warn!("subscribe to sensor topics failed: {}", e);
                false
            }
        }
    }

    fn replay_history(&mut self) {
        for kind in SensorKind::ALL {
            let subtree = match self.history.read(kind.history_path()) {
                Ok(Some(subtree)) => subtree,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("history for {} unavailable: {}", kind, e);
                    continue;
                }
            };

            let records = history::parse_records(kind, &subtree);
            let count = records.len();
            self.short.seed(records.iter().cloned());
            self.long.seed(records);
            self.stats.replayed += count as u64;
            log::debug!("replayed {} {} records", count, kind);
        }
    }

    /// Handle one channel event; returns the accepted sample, if any
    pub fn handle_event(&mut self, event: ChannelEvent) -> Option<SensorSample> {
        match event {
            ChannelEvent::Message { topic, payload } => {
                self.ingest_at(&topic, &payload, Local::now())
            }
            ChannelEvent::Connected => {
                log::info!("channel connected");
                self.link = LinkStatus::Live;
                // Broker sessions may not survive a reconnect
                if self.running {
                    self.subscribe();
                }
                None
            }
            ChannelEvent::Disconnected => {
                log::warn!("channel disconnected");
                self.link = LinkStatus::Faulted {
                    reason: "disconnected".to_string(),
                };
                if self.running {
                    if let Err(e) = self.channel.reconnect() {
                        log::warn!("reconnect request failed: {}", e);
                    }
                }
                None
            }
            ChannelEvent::Error(e) => {
                log::warn!("channel error: {}", e);
                self.link = LinkStatus::Faulted {
                    reason: e.to_string(),
                };
                None
            }
        }
    }

    /// Handle events in arrival order; returns how many samples were accepted
    pub fn drain<I>(&mut self, events: I) -> usize
    where
        I: IntoIterator<Item = ChannelEvent>,
    {
        events
            .into_iter()
            .filter_map(|event| self.handle_event(event))
            .count()
    }

    /// Decode a raw message received at `now` and merge it
    pub fn ingest_at(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: DateTime<Local>,
    ) -> Option<SensorSample> {
        if !self.running {
            return None;
        }

        match self.decoder.decode_at(topic, payload, now) {
            Ok(sample) => {
                self.accept(&sample);
                Some(sample)
            }
            Err(e) => {
                self.stats.rejected += 1;
                log::debug!("dropped message on '{}': {}", topic, e);
                None
            }
        }
    }

    /// Merge a decoded sample into both windows
    pub fn accept(&mut self, sample: &SensorSample) {
        self.short.push_sample(sample);
        self.long.push_sample(sample);
        self.stats.accepted += 1;
    }

    /// Unsubscribe; window contents are kept
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        if let Err(e) = self.channel.unsubscribe(&SENSOR_TOPICS) {
            log::warn!("unsubscribe failed: {}", e);
        }
        self.running = false;
    }

    /// Short-horizon window
    pub fn short_window(&self) -> &RollingWindow {
        &self.short
    }

    /// Long-horizon window
    pub fn long_window(&self) -> &RollingWindow {
        &self.long
    }

    /// Current link status
    pub fn link_status(&self) -> &LinkStatus {
        &self.link
    }

    /// True until the first connect or error
    pub fn is_loading(&self) -> bool {
        self.link == LinkStatus::Loading
    }

    /// True between start and shutdown
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Counters
    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Access the channel
    pub fn channel(&self) -> &C {
        &self.channel
    }
}

impl<C: MessageChannel, H: ReplicaStore> HealthCheckable for TelemetryAggregator<C, H> {
    fn health_check(&self) -> HealthCheck {
        match &self.link {
            LinkStatus::Live => HealthCheck::healthy("telemetry"),
            LinkStatus::Loading => HealthCheck::degraded("telemetry", "waiting for broker"),
            LinkStatus::Faulted { reason } => HealthCheck::unhealthy("telemetry", reason.clone()),
        }
    }
}
