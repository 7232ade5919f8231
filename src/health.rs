// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Component health
//!
//! The aggregator reports on its broker link, the control store on its
//! replica sync. [`HealthMonitor`] keeps the latest [`HealthCheck`] per
//! component, sorted by name, and the overall status is the most severe
//! one reported.

use std::fmt;

use serde::Serialize;

/// Health of one component, in increasing severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Working, but the operator should know (loading, write pending)
    Degraded,
    Unhealthy,
    /// Nothing reported yet
    Unknown,
}

impl HealthStatus {
    /// Healthy or degraded
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Strictly healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One component's report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub component: String,
    pub status: HealthStatus,
    /// Empty when healthy
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl HealthCheck {
    /// Healthy check with no message
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: String::new(),
        }
    }

    /// Degraded check explaining what is off
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: message.into(),
        }
    }

    /// Unhealthy check explaining the failure
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: message.into(),
        }
    }
}

/// Implemented by components that report their own health
pub trait HealthCheckable {
    fn health_check(&self) -> HealthCheck;
}

/// Latest check per component
#[derive(Debug, Default)]
pub struct HealthMonitor {
    checks: Vec<HealthCheck>,
}

impl HealthMonitor {
    /// Create a monitor with no checks
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask a component for its current check and record it
    pub fn observe(&mut self, component: &dyn HealthCheckable) {
        self.add_check(component.health_check());
    }

    /// Record a check, replacing the component's previous one
    pub fn add_check(&mut self, check: HealthCheck) {
        match self
            .checks
            .binary_search_by(|c| c.component.as_str().cmp(&check.component))
        {
            Ok(i) => self.checks[i] = check,
            Err(i) => self.checks.insert(i, check),
        }
    }

    /// Most severe reported status; `Unknown` until something reports
    pub fn status(&self) -> HealthStatus {
        self.checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Checks ordered by component name
    pub fn checks(&self) -> &[HealthCheck] {
        &self.checks
    }

    /// Latest check of `component`, if it reported
    pub fn get_check(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }

    /// True when the overall status is healthy or degraded
    pub fn is_operational(&self) -> bool {
        self.status().is_ok()
    }

    /// Plain-text summary, one line per component
    pub fn report(&self) -> String {
        let mut report = format!("overall: {}\n", self.status());
        for check in &self.checks {
            if check.message.is_empty() {
                report.push_str(&format!("{}: {}\n", check.component, check.status));
            } else {
                report.push_str(&format!(
                    "{}: {} ({})\n",
                    check.component, check.status, check.message
                ));
            }
        }
        report
    }
}
