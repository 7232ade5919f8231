// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Protocol definitions for Aquaview
//!
//! This module defines the wire-level vocabulary shared with the device:
//! - Sensor kinds and their channel topics
//! - Command topics published by the operator
//! - Replica paths for control state and historical records
//! - The decoded sensor sample

use chrono::{DateTime, Local};
use std::fmt;

/// Topic carrying the hour command
pub const HOUR_TOPIC: &str = "hour";

/// Topic carrying the mode command
pub const MODE_TOPIC: &str = "mode";

/// Replica path of the control state record
pub const CONTROL_STATE_PATH: &str = "controlState";

/// All sensor topics, in subscription order
pub const SENSOR_TOPICS: [&str; 3] = ["sensor/turbidity", "sensor/tds", "sensor/temperature"];

/// Kind of water-quality sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensorKind {
    /// Turbidity (NTU)
    Turbidity,
    /// Total dissolved solids (ppm)
    Tds,
    /// Water temperature (°C)
    Temperature,
}

impl SensorKind {
    /// All known kinds
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Turbidity,
        SensorKind::Tds,
        SensorKind::Temperature,
    ];

    /// Field name used in topics, records and data points
    pub fn field_name(&self) -> &'static str {
        match self {
            SensorKind::Turbidity => "turbidity",
            SensorKind::Tds => "tds",
            SensorKind::Temperature => "temperature",
        }
    }

    /// Channel topic this kind is published on
    pub fn topic(&self) -> &'static str {
        match self {
            SensorKind::Turbidity => SENSOR_TOPICS[0],
            SensorKind::Tds => SENSOR_TOPICS[1],
            SensorKind::Temperature => SENSOR_TOPICS[2],
        }
    }

    /// Replica path holding the historical records of this kind
    pub fn history_path(&self) -> &'static str {
        // Same layout as the topic tree
        self.topic()
    }

    /// Resolve a topic segment (e.g. `tds`)
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "turbidity" => Some(SensorKind::Turbidity),
            "tds" => Some(SensorKind::Tds),
            "temperature" => Some(SensorKind::Temperature),
            _ => None,
        }
    }

    /// Column label used by the CSV export
    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::Turbidity => "Turbidity",
            SensorKind::Tds => "TDS",
            SensorKind::Temperature => "Temperature",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// One decoded sensor reading
///
/// `observed_at` is the receive time: the device does not send timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    /// Which sensor produced the value
    pub kind: SensorKind,
    /// Finite measured value
    pub value: f64,
    /// Wall clock at decode time
    pub observed_at: DateTime<Local>,
}

impl SensorSample {
    /// Create a sample observed at the given time
    pub fn new(kind: SensorKind, value: f64, observed_at: DateTime<Local>) -> Self {
        Self {
            kind,
            value,
            observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_match_kinds() {
        for kind in SensorKind::ALL {
            assert_eq!(kind.topic(), format!("sensor/{}", kind.field_name()));
            assert_eq!(SensorKind::from_segment(kind.field_name()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_segment() {
        assert_eq!(SensorKind::from_segment("ph"), None);
        assert_eq!(SensorKind::from_segment("TDS"), None);
    }

    #[test]
    fn test_labels() {
        let labels: Vec<_> = SensorKind::ALL.iter().map(|k| k.label()).collect();
        assert_eq!(labels, vec!["Turbidity", "TDS", "Temperature"]);
    }
}
