// Aquaview Bridge - Hosted dashboard service
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Countdown tick source
//!
//! At most one tick chain runs at a time. Scheduling a new chain aborts
//! the previous task, and every tick carries the handle it was scheduled
//! for, so a tick already queued from an aborted chain is rejected by the
//! countdown as stale.

use std::time::Duration;

use aquaview::TimerHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Periodic tick task for the countdown
pub struct Ticker {
    period: Duration,
    tx: mpsc::Sender<TimerHandle>,
    task: Option<(TimerHandle, JoinHandle<()>)>,
}

impl Ticker {
    /// Create a ticker delivering into `tx`
    pub fn new(period: Duration, tx: mpsc::Sender<TimerHandle>) -> Self {
        Self {
            period,
            tx,
            task: None,
        }
    }

    /// Start a chain for `handle`, replacing any running one
    ///
    /// The first tick fires one period from now.
    pub fn schedule(&mut self, handle: TimerHandle) {
        self.cancel();

        let tx = self.tx.clone();
        let period = self.period;
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(handle).await.is_err() {
                    break;
                }
            }
        });

        tracing::debug!(generation = handle.generation(), "tick chain scheduled");
        self.task = Some((handle, task));
    }

    /// Stop the running chain, if any
    pub fn cancel(&mut self) {
        if let Some((handle, task)) = self.task.take() {
            task.abort();
            tracing::debug!(generation = handle.generation(), "tick chain cancelled");
        }
    }

    /// Handle of the running chain
    pub fn active(&self) -> Option<TimerHandle> {
        self.task.as_ref().map(|(handle, _)| *handle)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}
