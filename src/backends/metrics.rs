// ABOUTME: Metrics source capability trait.
// ABOUTME: Resource utilization reads and the advisory monitoring probe.

use async_trait::async_trait;

use crate::config::Environment;
use crate::types::{ClusterId, ServiceName};

/// Recent resource utilization for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct Utilization {
    pub cpu_pct: f64,
    pub memory_pct: f64,
}

/// Read-only queries against the metrics/time-series source.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Whether alarm coverage exists for the environment. Advisory: a false
    /// answer degrades the health report but never fails the gate.
    async fn monitoring_enabled(&self, environment: Environment) -> Result<bool, MetricsError>;

    /// CPU and memory utilization for a service over the recent window.
    async fn service_utilization(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
    ) -> Result<Utilization, MetricsError>;
}

/// Errors from metrics queries.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("no datapoints for {0}")]
    NoData(String),

    #[error("metrics query failed: {0}")]
    QueryFailed(String),
}
