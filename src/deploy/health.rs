// ABOUTME: Health verification orchestrator: an independent check battery
// ABOUTME: aggregated into one gate, retried whole with a fixed delay.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::attempt::HealthCheckResult;
use crate::backends::{ApiProbe, MetricsSource, ServiceOrchestrator, StoreOps};
use crate::config::{CacheConfig, Config, DatabaseConfig, Environment, Thresholds};
use crate::report::HealthReport;
use crate::types::{ClusterId, ServiceName, SpecVersionId};

use super::outcome::FailureKind;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("health gate failed after {attempts} attempt(s)")]
    GateFailed { attempts: u32 },
}

impl HealthError {
    pub fn kind(&self) -> FailureKind {
        // Verification exhausting its retries is a convergence failure: the
        // environment never settled into a healthy state in time.
        FailureKind::ConvergenceTimeout
    }
}

/// One service the battery checks, pinned to the spec version expected to be
/// primary.
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    pub service: ServiceName,
    pub cluster: ClusterId,
    pub spec: SpecVersionId,
}

/// Runs the health battery against the updated environment.
pub struct HealthVerifier {
    orchestrator: Arc<dyn ServiceOrchestrator>,
    stores: Arc<dyn StoreOps>,
    metrics: Arc<dyn MetricsSource>,
    api: Arc<dyn ApiProbe>,
    environment: Environment,
    thresholds: Thresholds,
    database: Option<DatabaseConfig>,
    cache: Option<CacheConfig>,
    report_path: PathBuf,
    retries: u32,
    retry_delay: Duration,
    expected_status: u16,
}

impl HealthVerifier {
    pub fn new(
        orchestrator: Arc<dyn ServiceOrchestrator>,
        stores: Arc<dyn StoreOps>,
        metrics: Arc<dyn MetricsSource>,
        api: Arc<dyn ApiProbe>,
        environment: Environment,
        config: &Config,
    ) -> Self {
        Self {
            orchestrator,
            stores,
            metrics,
            api,
            environment,
            thresholds: config.thresholds.clone(),
            database: config.database.clone(),
            cache: config.cache.clone(),
            report_path: config.report_path(),
            retries: config.timeouts.health_retries.max(1),
            retry_delay: config.timeouts.health_retry_delay,
            expected_status: config.api_check.as_ref().map_or(200, |a| a.expect_status),
        }
    }

    /// Run the whole battery up to the configured number of attempts, with a
    /// fixed delay between attempts; transient propagation delays right
    /// after a rollout are expected. A JSON report is written after every
    /// run. Returns the final battery's results and the gate outcome.
    pub async fn verify(
        &self,
        correlation_id: Uuid,
        targets: &[ServiceTarget],
    ) -> (Vec<HealthCheckResult>, Result<(), HealthError>) {
        let mut results = Vec::new();

        for attempt in 1..=self.retries {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }

            results = self.run_battery(targets).await;

            let report = HealthReport::new(self.environment, correlation_id, results.clone());
            report.write(&self.report_path);

            if report.passed() {
                tracing::info!(attempt, "health gate passed");
                return (results, Ok(()));
            }

            tracing::warn!(
                attempt,
                retries = self.retries,
                "health gate failed, required check(s) unhealthy"
            );
        }

        (
            results,
            Err(HealthError::GateFailed {
                attempts: self.retries,
            }),
        )
    }

    /// One full battery. Checks are independent: none depends on another's
    /// outcome, so they run concurrently.
    async fn run_battery(&self, targets: &[ServiceTarget]) -> Vec<HealthCheckResult> {
        let mut checks: Vec<BoxFuture<'_, HealthCheckResult>> = Vec::new();

        for target in targets {
            checks.push(self.check_service(target).boxed());
            checks.push(self.check_utilization(target).boxed());
        }

        if let Some(ref database) = self.database {
            checks.push(self.check_database(database).boxed());
        }

        if let Some(ref cache) = self.cache {
            checks.push(self.check_cache(cache).boxed());
        }

        checks.push(self.check_api().boxed());
        checks.push(self.check_monitoring().boxed());

        futures::future::join_all(checks).await
    }

    async fn check_service(&self, target: &ServiceTarget) -> HealthCheckResult {
        let name = format!("service/{}", target.service);

        match self
            .orchestrator
            .deployment_status(&target.cluster, &target.service, &target.spec)
            .await
        {
            Ok(status) => {
                let mut metrics = BTreeMap::new();
                metrics.insert("running".to_string(), f64::from(status.running));
                metrics.insert("desired".to_string(), f64::from(status.desired));

                HealthCheckResult {
                    check: name,
                    target: target.service.to_string(),
                    passed: status.primary_stable(),
                    required: true,
                    metrics,
                    detail: format!(
                        "{}/{} running, primary={}",
                        status.running, status.desired, status.primary
                    ),
                }
            }
            Err(e) => failed(name, target.service.to_string(), true, e.to_string()),
        }
    }

    async fn check_utilization(&self, target: &ServiceTarget) -> HealthCheckResult {
        let name = format!("utilization/{}", target.service);

        match self
            .metrics
            .service_utilization(&target.cluster, &target.service)
            .await
        {
            Ok(utilization) => {
                let mut metrics = BTreeMap::new();
                metrics.insert("cpu_pct".to_string(), utilization.cpu_pct);
                metrics.insert("memory_pct".to_string(), utilization.memory_pct);

                let passed = utilization.cpu_pct <= self.thresholds.cpu_pct
                    && utilization.memory_pct <= self.thresholds.memory_pct;

                HealthCheckResult {
                    check: name,
                    target: target.service.to_string(),
                    passed,
                    required: true,
                    metrics,
                    detail: format!(
                        "cpu {:.1}% (max {:.0}%), memory {:.1}% (max {:.0}%)",
                        utilization.cpu_pct,
                        self.thresholds.cpu_pct,
                        utilization.memory_pct,
                        self.thresholds.memory_pct
                    ),
                }
            }
            Err(e) => failed(name, target.service.to_string(), true, e.to_string()),
        }
    }

    async fn check_database(&self, database: &DatabaseConfig) -> HealthCheckResult {
        match self.stores.database_status(&database.identifier).await {
            Ok(status) => {
                let mut metrics = BTreeMap::new();
                metrics.insert("free_storage_pct".to_string(), status.free_storage_pct);

                let passed =
                    status.available && status.free_storage_pct >= self.thresholds.storage_free_pct;

                HealthCheckResult {
                    check: "database".to_string(),
                    target: database.identifier.clone(),
                    passed,
                    required: true,
                    metrics,
                    detail: format!(
                        "available={}, {:.1}% storage free (min {:.0}%)",
                        status.available, status.free_storage_pct, self.thresholds.storage_free_pct
                    ),
                }
            }
            Err(e) => failed(
                "database".to_string(),
                database.identifier.clone(),
                true,
                e.to_string(),
            ),
        }
    }

    async fn check_cache(&self, cache: &CacheConfig) -> HealthCheckResult {
        match self.stores.cache_status(&cache.cluster_id).await {
            Ok(status) => {
                let mut metrics = BTreeMap::new();
                metrics.insert("memory_used_pct".to_string(), status.memory_used_pct);

                let passed =
                    status.available && status.memory_used_pct <= self.thresholds.memory_pct;

                HealthCheckResult {
                    check: "cache".to_string(),
                    target: cache.cluster_id.clone(),
                    passed,
                    required: true,
                    metrics,
                    detail: format!(
                        "available={}, {:.1}% memory used (max {:.0}%)",
                        status.available, status.memory_used_pct, self.thresholds.memory_pct
                    ),
                }
            }
            Err(e) => failed(
                "cache".to_string(),
                cache.cluster_id.clone(),
                true,
                e.to_string(),
            ),
        }
    }

    async fn check_api(&self) -> HealthCheckResult {
        match self.api.probe().await {
            Ok(response) => {
                let latency_ms = response.latency.as_millis() as f64;
                let mut metrics = BTreeMap::new();
                metrics.insert("status".to_string(), f64::from(response.status));
                metrics.insert("latency_ms".to_string(), latency_ms);

                let status_ok = response.status == self.expected_status;
                let latency_ok = response.latency <= self.thresholds.api_latency;

                // The processing-time gate applies only when the response
                // carries that metadata.
                let processing_ok = match response.processing_time {
                    Some(processing) => {
                        metrics.insert(
                            "processing_time_ms".to_string(),
                            processing.as_millis() as f64,
                        );
                        processing <= self.thresholds.processing_time
                    }
                    None => true,
                };

                HealthCheckResult {
                    check: "api".to_string(),
                    target: "synthetic-request".to_string(),
                    passed: status_ok && latency_ok && processing_ok,
                    required: true,
                    metrics,
                    detail: format!(
                        "status {} in {:.0}ms (max {:.0}ms)",
                        response.status,
                        latency_ms,
                        self.thresholds.api_latency.as_millis()
                    ),
                }
            }
            Err(e) => failed(
                "api".to_string(),
                "synthetic-request".to_string(),
                true,
                e.to_string(),
            ),
        }
    }

    /// Advisory: absent monitoring degrades the report, never fails the gate.
    async fn check_monitoring(&self) -> HealthCheckResult {
        match self.metrics.monitoring_enabled(self.environment).await {
            Ok(enabled) => HealthCheckResult {
                check: "monitoring".to_string(),
                target: self.environment.to_string(),
                passed: enabled,
                required: false,
                metrics: BTreeMap::new(),
                detail: if enabled {
                    "alarm coverage present".to_string()
                } else {
                    "monitoring not enabled for this environment".to_string()
                },
            },
            Err(e) => failed(
                "monitoring".to_string(),
                self.environment.to_string(),
                false,
                e.to_string(),
            ),
        }
    }
}

fn failed(check: String, target: String, required: bool, detail: String) -> HealthCheckResult {
    HealthCheckResult {
        check,
        target,
        passed: false,
        required,
        metrics: BTreeMap::new(),
        detail,
    }
}
