// ABOUTME: Per-check numeric thresholds for health verification.
// ABOUTME: Defaults match the gate the operations runbook expects.

use serde::Deserialize;
use std::time::Duration;

/// Thresholds applied by the health verification battery.
#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    /// Maximum acceptable end-to-end latency for the synthetic API request.
    #[serde(default = "default_api_latency", with = "humantime_serde")]
    pub api_latency: Duration,

    /// Maximum acceptable server-side processing time, checked only when the
    /// response carries that metadata.
    #[serde(default = "default_processing_time", with = "humantime_serde")]
    pub processing_time: Duration,

    /// Maximum acceptable CPU utilization percentage per service.
    #[serde(default = "default_cpu_pct")]
    pub cpu_pct: f64,

    /// Maximum acceptable memory utilization percentage (services and cache).
    #[serde(default = "default_memory_pct")]
    pub memory_pct: f64,

    /// Minimum acceptable free storage percentage on the data store.
    #[serde(default = "default_storage_free_pct")]
    pub storage_free_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            api_latency: default_api_latency(),
            processing_time: default_processing_time(),
            cpu_pct: default_cpu_pct(),
            memory_pct: default_memory_pct(),
            storage_free_pct: default_storage_free_pct(),
        }
    }
}

fn default_api_latency() -> Duration {
    Duration::from_millis(2000)
}

fn default_processing_time() -> Duration {
    Duration::from_millis(500)
}

fn default_cpu_pct() -> f64 {
    80.0
}

fn default_memory_pct() -> f64 {
    80.0
}

fn default_storage_free_pct() -> f64 {
    20.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_runbook() {
        let t = Thresholds::default();
        assert_eq!(t.api_latency, Duration::from_millis(2000));
        assert_eq!(t.cpu_pct, 80.0);
        assert_eq!(t.storage_free_pct, 20.0);
    }

    #[test]
    fn parses_from_yaml_with_partial_overrides() {
        let t: Thresholds = serde_yaml::from_str("api_latency: 1s\ncpu_pct: 70\n").unwrap();
        assert_eq!(t.api_latency, Duration::from_secs(1));
        assert_eq!(t.cpu_pct, 70.0);
        assert_eq!(t.memory_pct, 80.0);
    }
}
