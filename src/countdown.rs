// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Countdown state machine
//!
//! ```text
//!   Idle ──start──▶ Running ──tick (timeLeft reaches 0)──▶ Expired
//!    ▲                │  ▲                                    │
//!    └──cancel / null─┘  └──────────────start─────────────────┘
//! ```
//!
//! The process does not own a clock. Whoever hosts it schedules one tick
//! per period and passes back the [`TimerHandle`] returned by
//! [`CountdownProcess::start`]. Starting again issues a new handle, so a
//! tick from a superseded chain is recognised as stale and does nothing.
//! Progress is written through the [`ControlStateStore`].

use crate::control::{ControlPatch, ControlStateStore};
use crate::replica::ReplicaStore;

/// Seconds per hour of countdown
pub const SECONDS_PER_HOUR: u64 = 3600;

/// Phase of the countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerPhase {
    /// No countdown
    #[default]
    Idle,
    /// Ticking down
    Running,
    /// Reached zero; `timeLeft` stays at 0
    Expired,
}

/// Identifies one tick chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    generation: u64,
}

impl TimerHandle {
    /// Chain number, increasing with every start
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of delivering one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Decremented; seconds left
    Remaining(u64),
    /// Reached zero on this tick
    Completed,
    /// Tick belongs to a cancelled or superseded chain
    Stale,
    /// `timeLeft` was cleared externally; the chain stopped
    Halted,
}

/// Result of reconciling with the stored `timeLeft`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// A countdown was found and a new chain must be scheduled
    Resumed(TimerHandle),
    /// The running chain was stopped because `timeLeft` was cleared
    Stopped,
    /// The running countdown was found at zero
    Expired,
    /// Nothing to do
    Unchanged,
}

/// Single countdown driven by `timeLeft`
#[derive(Debug, Default)]
pub struct CountdownProcess {
    phase: TimerPhase,
    generation: u64,
    active: Option<TimerHandle>,
    completions: u64,
}

impl CountdownProcess {
    /// Create an idle countdown
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting down `hours` hours, superseding any running chain
    ///
    /// A failed write is left to the store's retry; the countdown runs
    /// from the local state either way.
    pub fn start<S: ReplicaStore>(
        &mut self,
        hours: u32,
        store: &mut ControlStateStore<S>,
    ) -> TimerHandle {
        let seconds = u64::from(hours) * SECONDS_PER_HOUR;
        let handle = self.begin_chain();

        if let Err(e) = store.set(ControlPatch::new().time_left(Some(seconds))) {
            log::warn!("countdown start not persisted: {}", e);
        }

        log::debug!(
            "countdown started: {}s (chain {})",
            seconds,
            handle.generation
        );
        handle
    }

    fn begin_chain(&mut self) -> TimerHandle {
        self.generation += 1;
        let handle = TimerHandle {
            generation: self.generation,
        };
        self.active = Some(handle);
        self.phase = TimerPhase::Running;
        handle
    }

    /// Deliver one tick of chain `handle`
    pub fn tick<S: ReplicaStore>(
        &mut self,
        handle: TimerHandle,
        store: &mut ControlStateStore<S>,
    ) -> TickOutcome {
        if self.active != Some(handle) || self.phase != TimerPhase::Running {
            return TickOutcome::Stale;
        }

        let left = match store.get().time_left {
            None => {
                self.active = None;
                self.phase = TimerPhase::Idle;
                return TickOutcome::Halted;
            }
            Some(0) => {
                self.expire();
                return TickOutcome::Completed;
            }
            Some(left) => left - 1,
        };

        if let Err(e) = store.set(ControlPatch::new().time_left(Some(left))) {
            log::warn!("countdown progress not persisted: {}", e);
        }

        if left == 0 {
            self.expire();
            TickOutcome::Completed
        } else {
            TickOutcome::Remaining(left)
        }
    }

    fn expire(&mut self) {
        self.active = None;
        self.phase = TimerPhase::Expired;
        self.completions += 1;
        log::info!("countdown completed");
    }

    /// Stop the current chain; idempotent
    pub fn cancel(&mut self) {
        self.active = None;
        if self.phase == TimerPhase::Running {
            self.phase = TimerPhase::Idle;
        }
    }

    /// Align with the stored `timeLeft` after a load or remote replacement
    pub fn reconcile<S: ReplicaStore>(&mut self, store: &ControlStateStore<S>) -> Reconcile {
        match (store.get().time_left, self.phase) {
            (Some(0), TimerPhase::Running) => {
                self.expire();
                Reconcile::Expired
            }
            (Some(0), TimerPhase::Idle) => {
                // Already expired before we loaded it; no second notification
                self.phase = TimerPhase::Expired;
                Reconcile::Unchanged
            }
            (Some(left), TimerPhase::Idle | TimerPhase::Expired) if left > 0 => {
                let handle = self.begin_chain();
                log::debug!("countdown resumed at {}s", left);
                Reconcile::Resumed(handle)
            }
            (None, TimerPhase::Running) => {
                self.cancel();
                Reconcile::Stopped
            }
            (None, TimerPhase::Expired) => {
                self.phase = TimerPhase::Idle;
                Reconcile::Unchanged
            }
            _ => Reconcile::Unchanged,
        }
    }

    /// Current phase
    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    /// Handle of the live chain
    pub fn active_handle(&self) -> Option<TimerHandle> {
        self.active
    }

    /// True while a chain is ticking
    pub fn is_timer_active(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    /// Number of "timer completed" notifications raised
    pub fn completions(&self) -> u64 {
        self.completions
    }
}

/// Format seconds as `HH:MM:SS`; hours are not wrapped
pub fn format_time_left(seconds: u64) -> String {
    let hours = seconds / SECONDS_PER_HOUR;
    let minutes = (seconds % SECONDS_PER_HOUR) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}
