// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Historical record replay
//!
//! The replica keeps append-only records under `sensor/<kind>`, each
//! shaped `{ "time": "...", "<kind>": value }`. They are stored either as
//! an object keyed by push id (push ids sort chronologically) or as an
//! array. This module turns one such subtree into data points ready for
//! [`RollingWindow::seed`](crate::window::RollingWindow::seed).

use serde_json::Value;

use crate::protocol::SensorKind;
use crate::window::{DataPoint, PointTime};

/// Parse every usable record of one kind, oldest first.
///
/// Records without a numeric value are skipped. `0` is a reading, not a gap.
pub fn parse_records(kind: SensorKind, subtree: &Value) -> Vec<DataPoint> {
    let records: Vec<&Value> = match subtree {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries.into_iter().map(|(_, record)| record).collect()
        }
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    };

    let mut points = Vec::with_capacity(records.len());
    let mut skipped = 0usize;
    for record in records {
        match parse_record(kind, record) {
            Some(point) => points.push(point),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::debug!("skipped {} unusable {} records", skipped, kind);
    }

    points
}

/// Parse one `{ time, <kind>: value }` record
pub fn parse_record(kind: SensorKind, record: &Value) -> Option<DataPoint> {
    let value = numeric(record.get(kind.field_name())?)?;
    let time = match record.get("time") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    Some(DataPoint::new(PointTime::Recorded(time)).with(kind, value))
}

fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}
