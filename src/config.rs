// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for Aquaview

use std::time::Duration;

use crate::protocol::CONTROL_STATE_PATH;
use crate::recovery::RetryStrategy;

/// Capacity of the short-horizon window ("last hour" chart)
pub const SHORT_WINDOW_CAPACITY: usize = 12;

/// Capacity of the long-horizon window ("last 24 hours" chart)
pub const LONG_WINDOW_CAPACITY: usize = 24;

/// Dashboard-level configuration
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Points kept in the short-horizon window
    pub short_capacity: usize,

    /// Points kept in the long-horizon window
    pub long_capacity: usize,

    /// Period of the countdown tick
    pub tick_period: Duration,

    /// Backoff for failed control-state writes
    pub store_retry: RetryStrategy,

    /// Replica path of the control state record
    pub control_state_path: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            short_capacity: SHORT_WINDOW_CAPACITY,
            long_capacity: LONG_WINDOW_CAPACITY,
            tick_period: Duration::from_secs(1),
            store_retry: RetryStrategy::exponential(5, Duration::from_millis(500)),
            control_state_path: CONTROL_STATE_PATH.to_string(),
        }
    }
}

impl DashboardConfig {
    /// Create a configuration with custom window capacities
    pub fn with_capacities(short_capacity: usize, long_capacity: usize) -> Self {
        Self {
            short_capacity,
            long_capacity,
            ..Default::default()
        }
    }

    /// Create a configuration with a custom store retry strategy
    pub fn with_store_retry(store_retry: RetryStrategy) -> Self {
        Self {
            store_retry,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_config_default() {
        let config = DashboardConfig::default();
        assert_eq!(config.short_capacity, 12);
        assert_eq!(config.long_capacity, 24);
        assert_eq!(config.tick_period, Duration::from_secs(1));
        assert_eq!(config.control_state_path, "controlState");
        assert!(matches!(
            config.store_retry,
            RetryStrategy::Exponential { retries: 5, .. }
        ));
    }

    #[test]
    fn test_dashboard_config_with_capacities() {
        let config = DashboardConfig::with_capacities(3, 6);
        assert_eq!(config.short_capacity, 3);
        assert_eq!(config.long_capacity, 6);
    }

    #[test]
    fn test_dashboard_config_with_store_retry() {
        let config = DashboardConfig::with_store_retry(RetryStrategy::None);
        assert_eq!(config.store_retry, RetryStrategy::None);
    }
}
