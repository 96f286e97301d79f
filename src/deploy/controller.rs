// ABOUTME: Top-level attempt controller: strictly sequential phases with
// ABOUTME: mutual exclusion, audit trail, predecessor capture, and rollback.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::attempt::{
    AttemptStatus, AttemptStore, DeploymentAttempt, RolloutKind, StablePredecessor,
};
use crate::audit::AuditLog;
use crate::backends::{ApplyRequest, Backends, OrchestratorError};
use crate::config::{Config, Environment};
use crate::diagnostics::Diagnostics;
use crate::poll::PollConfig;
use crate::types::VersionTag;

use super::artifacts::ArtifactPipeline;
use super::health::{HealthVerifier, ServiceTarget};
use super::infra::InfrastructureApplier;
use super::lock::AttemptLock;
use super::outcome::DeployError;
use super::rollback::{RollbackController, RollbackError};
use super::rollout::{RolloutController, RolloutTarget};
use super::validate;

/// Set by the signal watcher; consulted at phase boundaries. An attempt may
/// only be aborted before it enters `ROLLING_OUT`; later signals are ignored
/// and the attempt runs to its verification verdict.
#[derive(Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owns one deployment (or standalone rollback) from invocation to terminal
/// status. Phases run strictly sequentially; parallelism lives inside them.
pub struct DeployController {
    base_config: Config,
    config: Config,
    environment: Environment,
    registry_host: String,
    backends: Backends,
    audit: AuditLog,
    store: AttemptStore,
    abort: AbortFlag,
}

impl DeployController {
    pub fn new(
        base_config: Config,
        environment: Environment,
        registry_host: String,
        backends: Backends,
        abort: AbortFlag,
    ) -> std::io::Result<Self> {
        let config = base_config.for_environment(environment);
        let audit = AuditLog::open(&config.audit_log_path())?;
        let store = AttemptStore::new(&config.state_dir);

        Ok(Self {
            base_config,
            config,
            environment,
            registry_host,
            backends,
            audit,
            store,
            abort,
        })
    }

    /// Run one end-to-end deployment attempt. Returns the attempt record
    /// (always, for summaries and reports) alongside the outcome.
    pub async fn deploy(&self, version: VersionTag) -> (DeploymentAttempt, Result<(), DeployError>) {
        let mut attempt = DeploymentAttempt::new(self.environment, version);
        let id = attempt.correlation_id;

        self.audit.record_with_reason(
            id,
            "attempt.started",
            &format!("{} {}", self.environment, attempt.version),
        );

        let result = self.run_phases(&mut attempt).await;

        match &result {
            Ok(()) => {
                attempt.set_status(AttemptStatus::Succeeded);
                self.audit.record(id, "attempt.status.SUCCEEDED");
            }
            Err(error) => {
                attempt.set_status(AttemptStatus::Failed);
                self.audit.record_with_reason(
                    id,
                    "attempt.status.FAILED",
                    &format!("{} failure in {} phase: {error}", error.kind(), error.phase()),
                );
            }
        }

        // A refused attempt never owned the environment; persisting it would
        // clobber the active attempt's record.
        if !matches!(result, Err(DeployError::Exclusion { .. })) {
            self.persist(&attempt);
        }
        (attempt, result)
    }

    async fn run_phases(&self, attempt: &mut DeploymentAttempt) -> Result<(), DeployError> {
        let id = attempt.correlation_id;

        // Mutual exclusion per environment. The lock spans the whole attempt
        // and its Drop releases on every exit path below.
        let lock = match AttemptLock::acquire(&self.config.state_dir, self.environment) {
            Ok(lock) => lock,
            Err(source) => {
                if let Ok(Some(last)) = self.store.load_last(self.environment)
                    && last.status.excludes_concurrent_attempt()
                {
                    tracing::warn!(
                        "attempt {} is still {}",
                        last.correlation_id,
                        last.status.as_str()
                    );
                }
                return Err(DeployError::Exclusion { source });
            }
        };

        // Phase 1: pre-flight validation, read-only probes only.
        self.audit.record(id, "attempt.status.VALIDATING");
        validate::validate(&self.base_config, self.environment, &self.backends)
            .await
            .map_err(|source| DeployError::Validation { source })?;

        self.check_abort(attempt)?;

        // Capture each service's stable predecessor before any mutation.
        // Rollback consults only this, never the orchestrator's state at
        // rollback time.
        self.capture_predecessors(attempt).await;
        self.persist(attempt);

        // Phase 2: build and push artifacts.
        self.transition(attempt, AttemptStatus::Building);
        let pipeline = ArtifactPipeline::new(
            Arc::clone(&self.backends.builder),
            Arc::clone(&self.backends.registry),
        );
        let components: Vec<_> = self.config.components.iter().cloned().collect();
        let (artifacts, built) = pipeline
            .run(
                &components,
                &self.registry_host,
                &attempt.version,
                self.config.parallel_build,
                &self.config.timeouts,
            )
            .await;
        attempt.artifacts = artifacts;
        built.map_err(|source| DeployError::Artifacts { source })?;

        self.check_abort(attempt)?;

        // Phase 3: infrastructure apply. Failure here terminates without
        // rollback: no rollout has been attempted yet.
        self.transition(attempt, AttemptStatus::ApplyingInfra);
        let applier = InfrastructureApplier::new(Arc::clone(&self.backends.provisioner));
        let request = ApplyRequest {
            environment: self.environment,
            version: attempt.version.clone(),
            attempt_id: id,
        };
        let mut diagnostics = Diagnostics::default();
        let outcome = applier
            .apply(
                &request,
                &self.config.backup_dir(),
                self.config.timeouts.infra_apply,
                &mut diagnostics,
            )
            .await
            .map_err(|source| DeployError::Infra { source })?;
        attempt.infra = Some(outcome.result);
        attempt.snapshot = outcome.snapshot;
        attempt.needs_data_restore = self.config.restore_on_rollback;
        self.persist(attempt);

        // Last abort point: once rolling out, the only way to stop is to
        // let verification fail and rollback run.
        self.check_abort(attempt)?;

        // Phase 4: rollout.
        self.transition(attempt, AttemptStatus::RollingOut);
        let targets = self.rollout_targets(attempt)?;
        let rollout = RolloutController::new(
            Arc::clone(&self.backends.orchestrator),
            PollConfig {
                interval: self.config.timeouts.rollout_poll_interval,
                deadline: self.config.timeouts.rollout,
            },
        );
        let (results, rolled_out) = rollout.run(&targets).await;
        attempt.rollouts = results;
        if let Err(source) = rolled_out {
            // Health verification is skipped; the attempt goes straight to
            // rollback using the captured predecessors.
            return self.enter_rollback(attempt, DeployError::Rollout { source }).await;
        }

        // Phase 5: health verification.
        self.transition(attempt, AttemptStatus::Verifying);
        let verifier = self.verifier();
        let verify_targets: Vec<ServiceTarget> = attempt
            .rollouts
            .iter()
            .filter(|r| r.kind == RolloutKind::Forward)
            .map(|r| ServiceTarget {
                service: r.service.clone(),
                cluster: r.cluster.clone(),
                spec: r.new_version.clone(),
            })
            .collect();
        let (health, verified) = verifier.verify(id, &verify_targets).await;
        attempt.health = health;
        if let Err(source) = verified {
            return self
                .enter_rollback(attempt, DeployError::Verification { source })
                .await;
        }

        if let Err(e) = lock.release() {
            tracing::warn!("failed to release attempt lock: {e}");
        }
        Ok(())
    }

    /// Standalone `rollback <environment>`: revert the most recent recorded
    /// attempt using its captured predecessors and snapshot.
    pub async fn rollback(&self) -> (Option<DeploymentAttempt>, Result<(), DeployError>) {
        let loaded = match self.store.load_last(self.environment) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("failed to read recorded attempt: {e}");
                None
            }
        };

        let Some(mut attempt) = loaded else {
            return (
                None,
                Err(DeployError::Rollback {
                    source: RollbackError::NoRecordedAttempt {
                        environment: self.environment,
                    },
                }),
            );
        };

        let lock = match AttemptLock::acquire(&self.config.state_dir, self.environment) {
            Ok(lock) => lock,
            Err(source) => return (Some(attempt), Err(DeployError::Exclusion { source })),
        };

        self.audit
            .record(attempt.correlation_id, "rollback.manual.requested");

        let rollback = self.rollback_controller();
        let result = rollback
            .run(&mut attempt, &self.audit)
            .await
            .map_err(|source| DeployError::Rollback { source });

        self.persist(&attempt);
        if let Err(e) = lock.release() {
            tracing::warn!("failed to release attempt lock: {e}");
        }
        (Some(attempt), result)
    }

    /// Run pre-flight validation only, mutating nothing.
    pub async fn validate_only(&self) -> Result<(), DeployError> {
        validate::validate(&self.base_config, self.environment, &self.backends)
            .await
            .map_err(|source| DeployError::Validation { source })
    }

    async fn enter_rollback(
        &self,
        attempt: &mut DeploymentAttempt,
        original: DeployError,
    ) -> Result<(), DeployError> {
        self.transition(attempt, AttemptStatus::RollingBack);

        let rollback = self.rollback_controller();
        match rollback.run(attempt, &self.audit).await {
            // Rollback completed; the original failure is what the operator
            // needs to see, and the exit is "degraded but stable".
            Ok(()) => Err(original),
            Err(source) => Err(DeployError::Rollback { source }),
        }
    }

    /// Record, per service, the spec version that is primary and fully
    /// stable right now. Services without one (first deploys, mid-incident
    /// services) are recorded as having no predecessor.
    async fn capture_predecessors(&self, attempt: &mut DeploymentAttempt) {
        for service in &self.config.services {
            match self
                .backends
                .orchestrator
                .active_deployment(&service.cluster, &service.name)
                .await
            {
                Ok(status) if status.primary_stable() => {
                    attempt.predecessors.insert(
                        service.name.to_string(),
                        StablePredecessor {
                            service: service.name.clone(),
                            cluster: service.cluster.clone(),
                            spec_version: status.spec_version,
                            running: status.running,
                            desired: status.desired,
                            captured_at: Utc::now(),
                        },
                    );
                }
                Ok(status) => {
                    tracing::warn!(
                        service = %service.name,
                        running = status.running,
                        desired = status.desired,
                        "service not stable at capture time; no predecessor recorded"
                    );
                }
                Err(OrchestratorError::DeploymentNotFound(_))
                | Err(OrchestratorError::ServiceNotFound(_)) => {
                    tracing::info!(
                        service = %service.name,
                        "no prior deployment; first rollout for this service"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        service = %service.name,
                        "predecessor lookup failed, none recorded: {e}"
                    );
                }
            }
        }

        self.audit.record_with_reason(
            attempt.correlation_id,
            "predecessors.captured",
            &format!("{} service(s)", attempt.predecessors.len()),
        );
    }

    fn rollout_targets(
        &self,
        attempt: &DeploymentAttempt,
    ) -> Result<Vec<RolloutTarget>, DeployError> {
        let mut targets = Vec::new();
        for service in &self.config.services {
            let artifact = attempt
                .artifacts
                .iter()
                .find(|a| a.component == service.component_name())
                .ok_or_else(|| DeployError::Validation {
                    source: super::validate::ValidationError::Failed {
                        failures: vec![super::validate::ValidationFailure {
                            check: format!("service/{}", service.name),
                            detail: format!(
                                "no pushed artifact for component '{}'",
                                service.component_name()
                            ),
                        }],
                    },
                })?;

            targets.push(RolloutTarget {
                service: service.clone(),
                image: artifact.image.clone(),
            });
        }
        Ok(targets)
    }

    fn verifier(&self) -> Arc<HealthVerifier> {
        Arc::new(HealthVerifier::new(
            Arc::clone(&self.backends.orchestrator),
            Arc::clone(&self.backends.stores),
            Arc::clone(&self.backends.metrics),
            Arc::clone(&self.backends.api),
            self.environment,
            &self.config,
        ))
    }

    fn rollback_controller(&self) -> RollbackController {
        RollbackController::new(
            Arc::clone(&self.backends.orchestrator),
            InfrastructureApplier::new(Arc::clone(&self.backends.provisioner)),
            Arc::clone(&self.backends.restore),
            self.verifier(),
            PollConfig {
                interval: self.config.timeouts.rollout_poll_interval,
                deadline: self.config.timeouts.rollout,
            },
            self.config.parallel_rollback,
        )
    }

    fn transition(&self, attempt: &mut DeploymentAttempt, status: AttemptStatus) {
        attempt.set_status(status);
        self.audit.record(
            attempt.correlation_id,
            &format!("attempt.status.{}", status.as_str()),
        );
        self.persist(attempt);
    }

    fn check_abort(&self, attempt: &DeploymentAttempt) -> Result<(), DeployError> {
        if self.abort.is_aborted() {
            self.audit
                .record(attempt.correlation_id, "attempt.aborted");
            return Err(DeployError::Aborted);
        }
        Ok(())
    }

    fn persist(&self, attempt: &DeploymentAttempt) {
        if let Err(e) = self.store.save(attempt) {
            tracing::warn!("failed to persist attempt record: {e}");
        }
    }
}
