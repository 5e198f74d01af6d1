//! Readiness checks over the store and both upstream sources.

use std::{fmt, time::Duration};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
  Healthy,
  /// Only non-critical checks failed.
  Degraded,
  /// At least one critical check failed.
  Unhealthy,
}

impl fmt::Display for HealthStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Healthy => "healthy",
      Self::Degraded => "degraded",
      Self::Unhealthy => "unhealthy",
    })
  }
}

/// The result of one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
  pub name:        &'static str,
  pub critical:    bool,
  pub healthy:     bool,
  pub duration_ms: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:       Option<String>,
}

impl HealthCheck {
  pub fn passed(name: &'static str, critical: bool, took: Duration) -> Self {
    Self { name, critical, healthy: true, duration_ms: millis(took), error: None }
  }

  pub fn failed(name: &'static str, critical: bool, took: Duration, error: impl Into<String>) -> Self {
    Self {
      name,
      critical,
      healthy: false,
      duration_ms: millis(took),
      error: Some(error.into()),
    }
  }
}

fn millis(d: Duration) -> u64 { u64::try_from(d.as_millis()).unwrap_or(u64::MAX) }

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
  pub overall: HealthStatus,
  pub checks:  Vec<HealthCheck>,
}

impl HealthReport {
  pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
    let overall = if checks.iter().any(|c| c.critical && !c.healthy) {
      HealthStatus::Unhealthy
    } else if checks.iter().any(|c| !c.healthy) {
      HealthStatus::Degraded
    } else {
      HealthStatus::Healthy
    };
    Self { overall, checks }
  }

  pub fn is_unhealthy(&self) -> bool { self.overall == HealthStatus::Unhealthy }
}
