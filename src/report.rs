// ABOUTME: Typed JSON health report written after every verification run.
// ABOUTME: Serializes the attempt's health results to the well-known path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::attempt::HealthCheckResult;
use crate::config::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// The JSON health report consumed by dashboards and operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub environment: Environment,
    pub correlation_id: Uuid,
    pub status: ReportStatus,
    pub checks: Vec<HealthCheckResult>,
}

impl HealthReport {
    pub fn new(
        environment: Environment,
        correlation_id: Uuid,
        checks: Vec<HealthCheckResult>,
    ) -> Self {
        let any_required_failed = checks.iter().any(|c| c.required && !c.passed);
        let any_advisory_failed = checks.iter().any(|c| !c.required && !c.passed);

        let status = if any_required_failed {
            ReportStatus::Unhealthy
        } else if any_advisory_failed {
            ReportStatus::Degraded
        } else {
            ReportStatus::Healthy
        };

        Self {
            generated_at: Utc::now(),
            environment,
            correlation_id,
            status,
            checks,
        }
    }

    pub fn passed(&self) -> bool {
        self.status != ReportStatus::Unhealthy
    }

    /// Write the report, replacing any previous one. Failures are logged and
    /// swallowed; reporting must never change the verification outcome.
    pub fn write(&self, path: &Path) {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::warn!("failed to create report directory: {e}");
            return;
        }

        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::warn!("failed to write health report: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize health report: {e}"),
        }
    }
}
