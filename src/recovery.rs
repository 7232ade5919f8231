// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Backoff for failed replica writes
//!
//! Retry strategies and a non-blocking backoff schedule. Everything runs on
//! one cooperative thread, so nothing here sleeps: the caller asks the
//! schedule when the next attempt is due and retries from its own timer.

use std::time::{Duration, Instant};

/// Delay policy for retrying a failed replica write
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Give up after the first failure
    #[default]
    None,
    /// Same delay before every retry
    Fixed { retries: u32, delay: Duration },
    /// Delay doubles with every retry, up to `cap`
    Exponential {
        retries: u32,
        first: Duration,
        cap: Duration,
    },
}

impl RetryStrategy {
    /// Longest delay of [`RetryStrategy::exponential`]
    pub const DEFAULT_CAP: Duration = Duration::from_secs(30);

    /// `retries` retries spaced `delay` apart
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self::Fixed { retries, delay }
    }

    /// `retries` retries starting at `first` and doubling
    pub fn exponential(retries: u32, first: Duration) -> Self {
        Self::Exponential {
            retries,
            first,
            cap: Self::DEFAULT_CAP,
        }
    }

    /// Delay before retry number `retry` (0 is the first retry)
    ///
    /// `None` once the strategy has given up.
    pub fn backoff(&self, retry: u32) -> Option<Duration> {
        match *self {
            Self::None => None,
            Self::Fixed { retries, delay } => (retry < retries).then_some(delay),
            Self::Exponential {
                retries,
                first,
                cap,
            } => {
                if retry >= retries {
                    return None;
                }
                let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
                Some(first.checked_mul(factor).map_or(cap, |d| d.min(cap)))
            }
        }
    }
}

/// Backoff bookkeeping for one failing operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySchedule {
    strategy: RetryStrategy,
    /// Failed retries so far (the initial failure is not counted)
    attempt: u32,
    next_at: Option<Instant>,
}

impl RetrySchedule {
    /// Start a schedule after the first failure at `now`
    pub fn after_failure(strategy: RetryStrategy, now: Instant) -> Self {
        let next_at = strategy.backoff(0).map(|d| now + d);
        Self {
            strategy,
            attempt: 0,
            next_at,
        }
    }

    /// Record another failed retry at `now`
    pub fn record_failure(&mut self, now: Instant) {
        self.attempt += 1;
        self.next_at = self
            .strategy
            .backoff(self.attempt)
            .map(|d| now + d);
    }

    /// When the next retry is due, `None` once exhausted
    pub fn next_at(&self) -> Option<Instant> {
        self.next_at
    }

    /// Check if a retry is due at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_at.map_or(false, |at| now >= at)
    }

    /// Check if the strategy gave up
    pub fn is_exhausted(&self) -> bool {
        self.next_at.is_none()
    }

    /// Failed retries so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
