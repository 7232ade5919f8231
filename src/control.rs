// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Operator control state and its durable mirror
//!
//! [`ControlStateStore`] owns the canonical in-memory [`ControlState`].
//! Every local [`set`](ControlStateStore::set) is written through to the
//! replica as a whole record. Remote notifications replace the whole
//! record (last writer wins); a notification equal to the current state,
//! such as the echo of our own write, changes nothing.
//!
//! A failed write does not roll back the local state. The store keeps the
//! record marked [`SyncStatus::Pending`] and re-writes it from
//! [`retry_pending`](ControlStateStore::retry_pending) on a backoff
//! schedule, reporting [`SyncStatus::Failed`] once the schedule gives up.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::DashboardConfig;
use crate::error::StoreError;
use crate::health::{HealthCheck, HealthCheckable};
use crate::recovery::{RetrySchedule, RetryStrategy};
use crate::replica::ReplicaStore;

/// Operator-set control record
///
/// Serialized as `{ "hour", "mode", "timeLeft" }`. Empty strings mean
/// "never set"; `time_left` is `None` when no countdown is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    pub hour: String,
    pub mode: String,
    pub time_left: Option<u64>,
}

impl ControlState {
    /// Parse a replica record
    ///
    /// Other writers are not strict about types, so numbers are accepted
    /// for `hour`/`mode` and a negative or non-integer `timeLeft` reads as
    /// no countdown. Anything but an object is rejected.
    pub fn from_value(path: &str, value: &Value) -> Result<Self, StoreError> {
        let record = value.as_object().ok_or_else(|| StoreError::InvalidRecord {
            path: path.to_string(),
            reason: format!("expected an object, got {}", value),
        })?;

        Ok(Self {
            hour: text_field(record, "hour"),
            mode: text_field(record, "mode"),
            time_left: record.get("timeLeft").and_then(Value::as_u64),
        })
    }

    /// Replica representation
    pub fn to_value(&self) -> Value {
        let mut record = Map::new();
        record.insert("hour".to_string(), Value::String(self.hour.clone()));
        record.insert("mode".to_string(), Value::String(self.mode.clone()));
        record.insert(
            "timeLeft".to_string(),
            self.time_left.map_or(Value::Null, Value::from),
        );
        Value::Object(record)
    }

    /// True while a countdown has seconds left
    pub fn is_timer_active(&self) -> bool {
        matches!(self.time_left, Some(left) if left > 0)
    }
}

fn text_field(record: &Map<String, Value>, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Partial update of a [`ControlState`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPatch {
    pub hour: Option<String>,
    pub mode: Option<String>,
    /// `Some(None)` clears the countdown
    pub time_left: Option<Option<u64>>,
}

impl ControlPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hour field
    pub fn hour(mut self, hour: impl Into<String>) -> Self {
        self.hour = Some(hour.into());
        self
    }

    /// Set the mode field
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Set or clear the countdown
    pub fn time_left(mut self, time_left: Option<u64>) -> Self {
        self.time_left = Some(time_left);
        self
    }

    /// Apply onto a state
    pub fn apply_to(&self, state: &mut ControlState) {
        if let Some(hour) = &self.hour {
            state.hour = hour.clone();
        }
        if let Some(mode) = &self.mode {
            state.mode = mode.clone();
        }
        if let Some(time_left) = self.time_left {
            state.time_left = time_left;
        }
    }
}

/// Whether the replica holds the current record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    /// Last write succeeded
    InSync,
    /// A write failed and a retry is scheduled
    Pending { attempts: u32 },
    /// Retries exhausted; cleared by the next successful write
    Failed { reason: String },
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::InSync => f.write_str("in sync"),
            SyncStatus::Pending { attempts } => {
                write!(f, "write pending ({} retries so far)", attempts)
            }
            SyncStatus::Failed { reason } => write!(f, "write failed: {}", reason),
        }
    }
}

/// Result of applying a remote notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// Remote value equals the current state
    Unchanged,
    /// Current state replaced by the remote value
    Replaced,
    /// Notification carried no usable record
    Ignored,
}

type ChangeListener = Box<dyn FnMut(&ControlState)>;

/// Canonical control state, mirrored to a durable replica
pub struct ControlStateStore<S: ReplicaStore> {
    replica: S,
    path: String,
    state: ControlState,
    sync: SyncStatus,
    retry: RetryStrategy,
    schedule: Option<RetrySchedule>,
    listeners: Vec<ChangeListener>,
}

impl<S: ReplicaStore> ControlStateStore<S> {
    /// Observe the control record and load its current value
    ///
    /// A missing record yields the empty default state.
    pub fn open(mut replica: S, config: &DashboardConfig) -> Result<Self, StoreError> {
        let path = config.control_state_path.clone();
        let initial = replica.observe(&path)?;

        let state = match initial {
            Some(value) => ControlState::from_value(&path, &value).unwrap_or_else(|e| {
                log::warn!("ignoring stored control state: {}", e);
                ControlState::default()
            }),
            None => ControlState::default(),
        };

        log::debug!("control state loaded from '{}': {:?}", path, state);

        Ok(Self {
            replica,
            path,
            state,
            sync: SyncStatus::InSync,
            retry: config.store_retry.clone(),
            schedule: None,
            listeners: Vec::new(),
        })
    }

    /// Current state
    pub fn get(&self) -> &ControlState {
        &self.state
    }

    /// Owned copy of the current state
    pub fn snapshot(&self) -> ControlState {
        self.state.clone()
    }

    /// Replica path of the record
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sync status of the replica copy
    pub fn sync_status(&self) -> &SyncStatus {
        &self.sync
    }

    /// When the next write retry is due
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.schedule.as_ref().and_then(RetrySchedule::next_at)
    }

    /// Register a callback for remote replacements
    pub fn on_remote_change<F>(&mut self, listener: F)
    where
        F: FnMut(&ControlState) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Apply a patch and write the whole record through
    ///
    /// The local state is updated even when the write fails; the error is
    /// returned and the write is retried later.
    pub fn set(&mut self, patch: ControlPatch) -> Result<(), StoreError> {
        patch.apply_to(&mut self.state);
        self.write_through(Instant::now())
    }

    fn write_through(&mut self, now: Instant) -> Result<(), StoreError> {
        match self.replica.write(&self.path, self.state.to_value()) {
            Ok(()) => {
                if self.schedule.take().is_some() {
                    log::info!("control state write recovered");
                }
                self.sync = SyncStatus::InSync;
                Ok(())
            }
            Err(e) => {
                log::warn!("control state write failed: {}", e);
                let schedule = self
                    .schedule
                    .get_or_insert_with(|| RetrySchedule::after_failure(self.retry.clone(), now));
                self.sync = status_for(schedule, &e);
                Err(e)
            }
        }
    }

    /// Re-write the current record if a retry is due at `now`
    ///
    /// Returns `None` when nothing was attempted.
    pub fn retry_pending(&mut self, now: Instant) -> Option<Result<(), StoreError>> {
        if !self.schedule.as_ref()?.is_due(now) {
            return None;
        }

        let result = self.replica.write(&self.path, self.state.to_value());
        match &result {
            Ok(()) => {
                log::info!("control state write recovered after retry");
                self.schedule = None;
                self.sync = SyncStatus::InSync;
            }
            Err(e) => {
                if let Some(schedule) = self.schedule.as_mut() {
                    schedule.record_failure(now);
                    log::warn!(
                        "control state retry {} failed: {}",
                        schedule.attempts(),
                        e
                    );
                    self.sync = status_for(schedule, e);
                }
            }
        }
        Some(result)
    }

    /// Apply a remote notification for the record
    ///
    /// Removal and malformed records are ignored. A differing record
    /// replaces the whole state and supersedes any pending local write.
    pub fn apply_remote(&mut self, value: Option<&Value>) -> RemoteApply {
        let Some(value) = value else {
            return RemoteApply::Ignored;
        };

        let remote = match ControlState::from_value(&self.path, value) {
            Ok(remote) => remote,
            Err(e) => {
                log::warn!("ignoring remote control state: {}", e);
                return RemoteApply::Ignored;
            }
        };

        if remote == self.state {
            return RemoteApply::Unchanged;
        }

        log::debug!("control state replaced remotely: {:?}", remote);
        self.state = remote;
        if self.schedule.take().is_some() {
            self.sync = SyncStatus::InSync;
        }
        for listener in self.listeners.iter_mut() {
            listener(&self.state);
        }
        RemoteApply::Replaced
    }

    /// Drain replica notifications and apply the newest one for the record
    ///
    /// Older notifications in the same batch are superseded; applying them
    /// one by one would briefly roll the state back to echoes of earlier
    /// writes.
    pub fn sync(&mut self) -> Result<RemoteApply, StoreError> {
        let changes = self.replica.poll_changes()?;
        let newest = changes.into_iter().rev().find(|c| c.path == self.path);

        Ok(match newest {
            Some(change) => self.apply_remote(change.value.as_ref()),
            None => RemoteApply::Unchanged,
        })
    }

    /// Access the underlying replica
    pub fn replica(&self) -> &S {
        &self.replica
    }
}

fn status_for(schedule: &RetrySchedule, error: &StoreError) -> SyncStatus {
    if schedule.is_exhausted() {
        SyncStatus::Failed {
            reason: error.to_string(),
        }
    } else {
        SyncStatus::Pending {
            attempts: schedule.attempts(),
        }
    }
}

impl<S: ReplicaStore> fmt::Debug for ControlStateStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlStateStore")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("sync", &self.sync)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<S: ReplicaStore> HealthCheckable for ControlStateStore<S> {
    fn health_check(&self) -> HealthCheck {
        match &self.sync {
            SyncStatus::InSync => HealthCheck::healthy("control_state"),
            SyncStatus::Pending { .. } => {
                HealthCheck::degraded("control_state", self.sync.to_string())
            }
            SyncStatus::Failed { .. } => {
                HealthCheck::unhealthy("control_state", self.sync.to_string())
            }
        }
    }
}
