// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Rolling windows of merged multi-sensor data points.
//!
//! A [`RollingWindow`] keeps at most `capacity` [`DataPoint`]s, oldest first.
//! Sensors publish on separate topics, so one physical reading of all
//! three sensors arrives as three messages. The window coalesces them:
//!
//! - if the newest point is missing a field the incoming point carries,
//!   the incoming fields are merged into it (the merge-slot);
//! - otherwise the incoming point is appended and the oldest points are
//!   evicted down to `capacity`.
//!
//! A producer that repeats one kind before the others arrive degrades the
//! window to one field per slot. That is accepted behavior.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

use crate::protocol::{SensorKind, SensorSample};

/// Time label of a data point
#[derive(Debug, Clone, PartialEq)]
pub enum PointTime {
    /// Receive time of a live sample
    Observed(DateTime<Local>),
    /// Time string carried by a historical record
    Recorded(String),
}

impl fmt::Display for PointTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointTime::Observed(at) => write!(f, "{}", at.format("%H:%M:%S")),
            PointTime::Recorded(label) => f.write_str(label),
        }
    }
}

impl Serialize for PointTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One row of a rolling window
///
/// Absent fields are gaps in the chart, never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub time: PointTime,
    pub turbidity: Option<f64>,
    pub tds: Option<f64>,
    pub temperature: Option<f64>,
}

impl DataPoint {
    /// Create a point with no sensor fields yet
    pub fn new(time: PointTime) -> Self {
        Self {
            time,
            turbidity: None,
            tds: None,
            temperature: None,
        }
    }

    /// Create a single-field point from a live sample
    pub fn from_sample(sample: &SensorSample) -> Self {
        Self::new(PointTime::Observed(sample.observed_at)).with(sample.kind, sample.value)
    }

    /// Builder: set one field
    pub fn with(mut self, kind: SensorKind, value: f64) -> Self {
        self.set(kind, value);
        self
    }

    /// Value of one field
    pub fn get(&self, kind: SensorKind) -> Option<f64> {
        match kind {
            SensorKind::Turbidity => self.turbidity,
            SensorKind::Tds => self.tds,
            SensorKind::Temperature => self.temperature,
        }
    }

    /// Set one field
    pub fn set(&mut self, kind: SensorKind, value: f64) {
        let slot = match kind {
            SensorKind::Turbidity => &mut self.turbidity,
            SensorKind::Tds => &mut self.tds,
            SensorKind::Temperature => &mut self.temperature,
        };
        *slot = Some(value);
    }

    /// Kinds present in this point
    pub fn kinds(&self) -> impl Iterator<Item = SensorKind> + '_ {
        SensorKind::ALL
            .into_iter()
            .filter(move |kind| self.get(*kind).is_some())
    }

    /// True when no sensor field is present
    pub fn is_empty(&self) -> bool {
        self.kinds().next().is_none()
    }

    /// True when every field of `other` is already present here
    pub fn defines_all_of(&self, other: &DataPoint) -> bool {
        other.kinds().all(|kind| self.get(kind).is_some())
    }

    /// Field-wise union: fields of `other` overwrite, time follows `other`
    pub fn absorb(&mut self, other: DataPoint) {
        for kind in SensorKind::ALL {
            if let Some(value) = other.get(kind) {
                self.set(kind, value);
            }
        }
        self.time = other.time;
    }
}

/// Result of feeding one point into a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Fields were merged into the newest point
    Merged,
    /// A new point was appended, `evicted` old points dropped
    Appended { evicted: usize },
    /// The point carried no sensor field
    Ignored,
}

/// Fixed-capacity ordered buffer of data points, oldest first
#[derive(Debug, Clone)]
pub struct RollingWindow {
    points: VecDeque<DataPoint>,
    capacity: usize,
}

impl RollingWindow {
    /// Create an empty window
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Merge a live sample into the window
    pub fn push_sample(&mut self, sample: &SensorSample) -> MergeOutcome {
        self.merge(DataPoint::from_sample(sample))
    }

    /// Merge-or-append one point
    pub fn merge(&mut self, point: DataPoint) -> MergeOutcome {
        if point.is_empty() {
            return MergeOutcome::Ignored;
        }

        if let Some(last) = self.points.back_mut() {
            if !last.defines_all_of(&point) {
                last.absorb(point);
                return MergeOutcome::Merged;
            }
        }

        self.points.push_back(point);
        let evicted = self.truncate();
        MergeOutcome::Appended { evicted }
    }

    /// Prepend replayed points (oldest first) ahead of the current content.
    ///
    /// The result keeps the newest `capacity` points, so replayed data can
    /// never push out points that were already collected live. Returns how
    /// many replayed points survived.
    pub fn seed<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = DataPoint>,
    {
        let mut seeded: VecDeque<DataPoint> =
            records.into_iter().filter(|p| !p.is_empty()).collect();
        let replayed = seeded.len();
        let live = self.points.len();

        seeded.append(&mut self.points);
        self.points = seeded;
        self.truncate();

        replayed.min(self.capacity.saturating_sub(live))
    }

    /// Drop oldest points until within capacity
    fn truncate(&mut self) -> usize {
        let mut evicted = 0;
        while self.points.len() > self.capacity {
            self.points.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Points, oldest first
    pub fn points(&self) -> impl Iterator<Item = &DataPoint> {
        self.points.iter()
    }

    /// Owned copy of the points, oldest first
    pub fn to_vec(&self) -> Vec<DataPoint> {
        self.points.iter().cloned().collect()
    }

    /// Newest point
    pub fn last(&self) -> Option<&DataPoint> {
        self.points.back()
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the window is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Maximum number of points
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
