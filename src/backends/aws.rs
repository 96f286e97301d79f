// ABOUTME: AWS CLI-backed collaborators: ECS orchestration, CloudWatch
// ABOUTME: metrics, and RDS/ElastiCache store status.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::config::Environment;
use crate::types::{ClusterId, ImageRef, ServiceName, SpecVersionId};

use super::command;
use super::metrics::{MetricsError, MetricsSource, Utilization};
use super::orchestrator::{DeploymentStatus, OrchestratorError, ServiceOrchestrator};
use super::stores::{CacheStatus, DatabaseStatus, StoreError, StoreOps};

/// Shared AWS CLI runner pinned to one region.
pub struct AwsCli {
    bin: String,
    region: String,
    project: String,
}

impl AwsCli {
    pub fn new(region: String, project: String) -> Self {
        Self {
            bin: "aws".to_string(),
            region,
            project,
        }
    }

    async fn run(&self, args: &[&str]) -> std::io::Result<command::CommandOutput> {
        let mut full = vec!["--region", self.region.as_str(), "--output", "json"];
        full.extend_from_slice(args);
        command::run(&self.bin, &full, None, &HashMap::new()).await
    }

    async fn run_json<E>(
        &self,
        args: &[&str],
        map_err: impl Fn(String) -> E,
    ) -> Result<Value, E> {
        let out = self.run(args).await.map_err(|e| map_err(e.to_string()))?;
        if !out.success {
            return Err(map_err(out.failure_detail()));
        }
        serde_json::from_str(&out.stdout).map_err(|e| map_err(format!("unparseable output: {e}")))
    }
}

// =============================================================================
// ECS orchestration
// =============================================================================

fn service_json<'a>(value: &'a Value, service: &ServiceName) -> Option<&'a Value> {
    value
        .get("services")
        .and_then(Value::as_array)
        .and_then(|services| {
            services
                .iter()
                .find(|s| s.pointer("/serviceName").and_then(Value::as_str) == Some(service.as_str()))
        })
}

fn deployment_to_status(deployment: &Value) -> Option<DeploymentStatus> {
    Some(DeploymentStatus {
        spec_version: SpecVersionId::new(
            deployment.pointer("/taskDefinition")?.as_str()?.to_string(),
        ),
        primary: deployment.pointer("/status").and_then(Value::as_str) == Some("PRIMARY"),
        running: deployment.pointer("/runningCount")?.as_u64()? as u32,
        desired: deployment.pointer("/desiredCount")?.as_u64()? as u32,
    })
}

#[async_trait]
impl ServiceOrchestrator for AwsCli {
    async fn cluster_reachable(&self, cluster: &ClusterId) -> Result<(), OrchestratorError> {
        let value = self
            .run_json(
                &["ecs", "describe-clusters", "--clusters", cluster.as_str()],
                OrchestratorError::Backend,
            )
            .await?;

        let active = value
            .get("clusters")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.pointer("/status"))
            .and_then(Value::as_str)
            == Some("ACTIVE");

        if active {
            Ok(())
        } else {
            Err(OrchestratorError::ClusterNotFound(
                cluster.as_str().to_string(),
            ))
        }
    }

    async fn active_deployment(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        let value = self
            .run_json(
                &[
                    "ecs",
                    "describe-services",
                    "--cluster",
                    cluster.as_str(),
                    "--services",
                    service.as_str(),
                ],
                OrchestratorError::Backend,
            )
            .await?;

        let svc = service_json(&value, service)
            .ok_or_else(|| OrchestratorError::ServiceNotFound(service.to_string()))?;

        svc.pointer("/deployments")
            .and_then(Value::as_array)
            .and_then(|deployments| {
                deployments
                    .iter()
                    .find(|d| d.pointer("/status").and_then(Value::as_str) == Some("PRIMARY"))
            })
            .and_then(deployment_to_status)
            .ok_or_else(|| OrchestratorError::DeploymentNotFound(service.to_string()))
    }

    async fn register_spec(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
        container: &str,
        image: &ImageRef,
    ) -> Result<SpecVersionId, OrchestratorError> {
        let active = self.active_deployment(cluster, service).await?;

        let value = self
            .run_json(
                &[
                    "ecs",
                    "describe-task-definition",
                    "--task-definition",
                    active.spec_version.as_str(),
                ],
                |detail| OrchestratorError::RegistrationFailed {
                    service: service.to_string(),
                    detail,
                },
            )
            .await?;

        let mut definition = value
            .get("taskDefinition")
            .cloned()
            .ok_or_else(|| OrchestratorError::RegistrationFailed {
                service: service.to_string(),
                detail: "missing taskDefinition in response".to_string(),
            })?;

        // Strip read-only fields the register call rejects.
        if let Some(map) = definition.as_object_mut() {
            for field in [
                "taskDefinitionArn",
                "revision",
                "status",
                "requiresAttributes",
                "compatibilities",
                "registeredAt",
                "registeredBy",
                "deregisteredAt",
            ] {
                map.remove(field);
            }
        }

        // Substitute the image on the matching container only.
        let substituted = definition
            .pointer_mut("/containerDefinitions")
            .and_then(Value::as_array_mut)
            .map(|containers| {
                let mut found = false;
                for c in containers.iter_mut() {
                    if c.pointer("/name").and_then(Value::as_str) == Some(container) {
                        c["image"] = Value::String(image.to_string());
                        found = true;
                    }
                }
                found
            })
            .unwrap_or(false);

        if !substituted {
            return Err(OrchestratorError::RegistrationFailed {
                service: service.to_string(),
                detail: format!("container '{container}' not present in specification"),
            });
        }

        let input = definition.to_string();
        let value = self
            .run_json(
                &[
                    "ecs",
                    "register-task-definition",
                    "--cli-input-json",
                    input.as_str(),
                ],
                |detail| OrchestratorError::RegistrationFailed {
                    service: service.to_string(),
                    detail,
                },
            )
            .await?;

        value
            .pointer("/taskDefinition/taskDefinitionArn")
            .and_then(Value::as_str)
            .map(SpecVersionId::new)
            .ok_or_else(|| OrchestratorError::RegistrationFailed {
                service: service.to_string(),
                detail: "registration response carries no ARN".to_string(),
            })
    }

    async fn replace_service(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
        spec: &SpecVersionId,
    ) -> Result<(), OrchestratorError> {
        let out = self
            .run(&[
                "ecs",
                "update-service",
                "--cluster",
                cluster.as_str(),
                "--service",
                service.as_str(),
                "--task-definition",
                spec.as_str(),
                "--force-new-deployment",
            ])
            .await
            .map_err(|e| OrchestratorError::Backend(e.to_string()))?;

        if out.success {
            Ok(())
        } else {
            Err(OrchestratorError::ReplacementFailed {
                service: service.to_string(),
                detail: out.failure_detail(),
            })
        }
    }

    async fn deployment_status(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
        spec: &SpecVersionId,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        let value = self
            .run_json(
                &[
                    "ecs",
                    "describe-services",
                    "--cluster",
                    cluster.as_str(),
                    "--services",
                    service.as_str(),
                ],
                OrchestratorError::Backend,
            )
            .await?;

        let svc = service_json(&value, service)
            .ok_or_else(|| OrchestratorError::ServiceNotFound(service.to_string()))?;

        svc.pointer("/deployments")
            .and_then(Value::as_array)
            .and_then(|deployments| {
                deployments
                    .iter()
                    .find(|d| d.pointer("/taskDefinition").and_then(Value::as_str) == Some(spec.as_str()))
            })
            .and_then(deployment_to_status)
            .ok_or_else(|| OrchestratorError::DeploymentNotFound(spec.as_str().to_string()))
    }
}

// =============================================================================
// CloudWatch metrics
// =============================================================================

impl AwsCli {
    async fn average_metric(
        &self,
        namespace: &str,
        metric: &str,
        dimensions: &str,
    ) -> Result<f64, MetricsError> {
        let end = Utc::now();
        let start = end - ChronoDuration::minutes(10);
        let start_str = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end_str = end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let value = self
            .run_json(
                &[
                    "cloudwatch",
                    "get-metric-statistics",
                    "--namespace",
                    namespace,
                    "--metric-name",
                    metric,
                    "--dimensions",
                    dimensions,
                    "--statistics",
                    "Average",
                    "--period",
                    "300",
                    "--start-time",
                    start_str.as_str(),
                    "--end-time",
                    end_str.as_str(),
                ],
                MetricsError::QueryFailed,
            )
            .await?;

        value
            .get("Datapoints")
            .and_then(Value::as_array)
            .and_then(|points| {
                let averages: Vec<f64> = points
                    .iter()
                    .filter_map(|p| p.pointer("/Average").and_then(Value::as_f64))
                    .collect();
                if averages.is_empty() {
                    None
                } else {
                    Some(averages.iter().sum::<f64>() / averages.len() as f64)
                }
            })
            .ok_or_else(|| MetricsError::NoData(metric.to_string()))
    }
}

#[async_trait]
impl MetricsSource for AwsCli {
    async fn monitoring_enabled(&self, environment: Environment) -> Result<bool, MetricsError> {
        let prefix = format!("{}-{}", self.project, environment);
        let value = self
            .run_json(
                &[
                    "cloudwatch",
                    "describe-alarms",
                    "--alarm-name-prefix",
                    prefix.as_str(),
                    "--max-records",
                    "1",
                ],
                MetricsError::QueryFailed,
            )
            .await?;

        Ok(value
            .get("MetricAlarms")
            .and_then(Value::as_array)
            .is_some_and(|alarms| !alarms.is_empty()))
    }

    async fn service_utilization(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
    ) -> Result<Utilization, MetricsError> {
        let dimensions = format!(
            "Name=ClusterName,Value={} Name=ServiceName,Value={}",
            cluster.as_str(),
            service.as_str()
        );

        let cpu_pct = self
            .average_metric("AWS/ECS", "CPUUtilization", &dimensions)
            .await?;
        let memory_pct = self
            .average_metric("AWS/ECS", "MemoryUtilization", &dimensions)
            .await?;

        Ok(Utilization {
            cpu_pct,
            memory_pct,
        })
    }
}

// =============================================================================
// RDS and ElastiCache stores
// =============================================================================

#[async_trait]
impl StoreOps for AwsCli {
    async fn database_status(&self, identifier: &str) -> Result<DatabaseStatus, StoreError> {
        let value = self
            .run_json(
                &[
                    "rds",
                    "describe-db-instances",
                    "--db-instance-identifier",
                    identifier,
                ],
                StoreError::QueryFailed,
            )
            .await?;

        let instance = value
            .get("DBInstances")
            .and_then(Value::as_array)
            .and_then(|instances| instances.first())
            .ok_or_else(|| StoreError::NotFound(identifier.to_string()))?;

        let available =
            instance.pointer("/DBInstanceStatus").and_then(Value::as_str) == Some("available");

        let allocated_gb = instance
            .pointer("/AllocatedStorage")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let dimensions = format!("Name=DBInstanceIdentifier,Value={identifier}");
        let free_bytes = self
            .average_metric("AWS/RDS", "FreeStorageSpace", &dimensions)
            .await
            .unwrap_or(0.0);

        let allocated_bytes = allocated_gb * 1024.0 * 1024.0 * 1024.0;
        let free_storage_pct = if allocated_bytes > 0.0 {
            (free_bytes / allocated_bytes) * 100.0
        } else {
            0.0
        };

        Ok(DatabaseStatus {
            available,
            free_storage_pct,
        })
    }

    async fn cache_status(&self, cluster_id: &str) -> Result<CacheStatus, StoreError> {
        let value = self
            .run_json(
                &[
                    "elasticache",
                    "describe-cache-clusters",
                    "--cache-cluster-id",
                    cluster_id,
                ],
                StoreError::QueryFailed,
            )
            .await?;

        let cluster = value
            .get("CacheClusters")
            .and_then(Value::as_array)
            .and_then(|clusters| clusters.first())
            .ok_or_else(|| StoreError::NotFound(cluster_id.to_string()))?;

        let available =
            cluster.pointer("/CacheClusterStatus").and_then(Value::as_str) == Some("available");

        let dimensions = format!("Name=CacheClusterId,Value={cluster_id}");
        let memory_used_pct = self
            .average_metric("AWS/ElastiCache", "DatabaseMemoryUsagePercentage", &dimensions)
            .await
            .unwrap_or(0.0);

        Ok(CacheStatus {
            available,
            memory_used_pct,
        })
    }
}
