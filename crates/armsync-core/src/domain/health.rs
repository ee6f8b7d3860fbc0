//! Health reports for the coordination components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Overall health of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A point-in-time health check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Component name (e.g. "resource_manager")
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    pub metrics: Map<String, Value>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub(crate) fn new(
        component: &str,
        status: HealthStatus,
        message: impl Into<String>,
        metrics: Map<String, Value>,
    ) -> Self {
        Self {
            component: component.to_string(),
            status,
            message: message.into(),
            metrics,
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Thresholds for health checks
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Resource utilization above which the resource manager reports a warning
    pub warning_utilization: f64,

    /// Pending tasks per worker above which the pool reports a warning
    pub warning_backlog_per_worker: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            warning_utilization: 0.8,
            warning_backlog_per_worker: 10,
        }
    }
}
