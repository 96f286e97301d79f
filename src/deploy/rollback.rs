// ABOUTME: Rollback controller: revert services to captured predecessors,
// ABOUTME: re-apply the infra snapshot, optionally restore data, re-verify.

use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::attempt::{
    DeploymentAttempt, RolloutKind, RolloutStatus, ServiceRolloutResult, StablePredecessor,
};
use crate::audit::AuditLog;
use crate::backends::{DataRestore, OrchestratorError, RestoreError, ServiceOrchestrator};
use crate::config::Environment;
use crate::poll::{PollConfig, PollOutcome, poll_until};
use crate::types::ServiceName;

use super::health::{HealthVerifier, ServiceTarget};
use super::infra::{InfraError, InfrastructureApplier};
use super::outcome::FailureKind;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("no stable predecessor for: {}", services.iter().map(ServiceName::as_str).collect::<Vec<_>>().join(", "))]
    NoStablePredecessor { services: Vec<ServiceName> },

    #[error("no recorded attempt for {environment}")]
    NoRecordedAttempt { environment: Environment },

    #[error("reversion failed for {service}: {detail}")]
    ReversionFailed {
        service: ServiceName,
        detail: String,
    },

    #[error("reversion timed out for: {}", services.iter().map(ServiceName::as_str).collect::<Vec<_>>().join(", "))]
    ReversionTimedOut { services: Vec<ServiceName> },

    #[error("infrastructure snapshot restore failed: {source}")]
    InfraRestore { source: InfraError },

    #[error("data restore failed: {source}")]
    DataRestore { source: RestoreError },

    #[error("reverted state failed health verification after {attempts} attempt(s)")]
    VerificationFailed { attempts: u32 },
}

impl RollbackError {
    pub fn kind(&self) -> FailureKind {
        match self {
            // Fatal, non-retryable, requires operator intervention.
            RollbackError::NoStablePredecessor { .. }
            | RollbackError::NoRecordedAttempt { .. } => FailureKind::RollbackImpossible,
            // Everything else means the compensating action itself failed.
            _ => FailureKind::RollbackFailed,
        }
    }
}

/// Reverts an attempt to its captured predecessors. Depends only on the
/// narrow rollout and health capabilities it is given.
pub struct RollbackController {
    orchestrator: Arc<dyn ServiceOrchestrator>,
    infra: InfrastructureApplier,
    restore: Arc<dyn DataRestore>,
    verifier: Arc<HealthVerifier>,
    poll: PollConfig,
    parallel: bool,
}

impl RollbackController {
    pub fn new(
        orchestrator: Arc<dyn ServiceOrchestrator>,
        infra: InfrastructureApplier,
        restore: Arc<dyn DataRestore>,
        verifier: Arc<HealthVerifier>,
        poll: PollConfig,
        parallel: bool,
    ) -> Self {
        Self {
            orchestrator,
            infra,
            restore,
            verifier,
            poll,
            parallel,
        }
    }

    /// Run the full rollback for an attempt, appending reversion entries and
    /// health results to it. A rollback that itself fails verification is
    /// terminal; no second-order rollback is attempted.
    pub async fn run(
        &self,
        attempt: &mut DeploymentAttempt,
        audit: &AuditLog,
    ) -> Result<(), RollbackError> {
        let id = attempt.correlation_id;
        audit.record(id, "rollback.initiated");

        // (1) Every touched service must have a predecessor that was primary
        // and fully stable before the attempt began. If any is missing, no
        // reversion call is made at all: the end state stays deterministic
        // and the operator decides.
        let touched = touched_services(attempt);
        let mut predecessors = Vec::new();
        let mut missing = Vec::new();
        for service in &touched {
            match attempt.predecessors.get(service.as_str()) {
                Some(predecessor) => predecessors.push(predecessor.clone()),
                None => missing.push(service.clone()),
            }
        }

        if !missing.is_empty() {
            let error = RollbackError::NoStablePredecessor { services: missing };
            audit.record_with_reason(id, "rollback.impossible", &error.to_string());
            return Err(error);
        }

        // (2) Revert each service and poll it to stability.
        audit.record(id, "rollback.reversion.started");
        let (reversions, revert_outcome) = self.revert_services(&predecessors).await;
        attempt.rollouts.extend(reversions);
        match &revert_outcome {
            Ok(()) => audit.record(id, "rollback.reversion.completed"),
            Err(e) => audit.record_with_reason(id, "rollback.reversion.failed", &e.to_string()),
        }
        revert_outcome?;

        // (3) Re-apply the pre-deployment infrastructure snapshot.
        if let Some(snapshot) = attempt.snapshot.clone() {
            audit.record(id, "rollback.infra.restore.started");
            match self.infra.restore(&snapshot, attempt.environment).await {
                Ok(()) => audit.record(id, "rollback.infra.restore.completed"),
                Err(source) => {
                    audit.record_with_reason(
                        id,
                        "rollback.infra.restore.failed",
                        &source.to_string(),
                    );
                    return Err(RollbackError::InfraRestore { source });
                }
            }
        } else {
            tracing::warn!("no infrastructure snapshot recorded; skipping state restore");
        }

        // (4) Data restore, only when a prior phase flagged it.
        if attempt.needs_data_restore {
            audit.record(id, "rollback.data.restore.started");
            match self.restore.restore(attempt.environment).await {
                Ok(()) => audit.record(id, "rollback.data.restore.completed"),
                Err(source) => {
                    audit.record_with_reason(
                        id,
                        "rollback.data.restore.failed",
                        &source.to_string(),
                    );
                    return Err(RollbackError::DataRestore { source });
                }
            }
        }

        // (5) The reverted state must itself pass the health gate.
        audit.record(id, "rollback.verification.started");
        let targets: Vec<ServiceTarget> = predecessors
            .iter()
            .map(|p| ServiceTarget {
                service: p.service.clone(),
                cluster: p.cluster.clone(),
                spec: p.spec_version.clone(),
            })
            .collect();

        let (results, verified) = self.verifier.verify(id, &targets).await;
        attempt.health = results;

        match verified {
            Ok(()) => {
                audit.record(id, "rollback.verification.passed");
                Ok(())
            }
            Err(e) => {
                audit.record_with_reason(id, "rollback.verification.failed", &e.to_string());
                let super::health::HealthError::GateFailed { attempts } = e;
                Err(RollbackError::VerificationFailed { attempts })
            }
        }
    }

    /// Revert every service, in parallel when configured. Each reversion is
    /// polled to stability with the same discipline as a forward rollout.
    /// A failed reversion never cancels its siblings.
    async fn revert_services(
        &self,
        predecessors: &[StablePredecessor],
    ) -> (Vec<ServiceRolloutResult>, Result<(), RollbackError>) {
        let mut results = Vec::new();
        let mut first_error: Option<RollbackError> = None;
        let mut timed_out = Vec::new();

        if self.parallel {
            let mut join = JoinSet::new();
            for predecessor in predecessors {
                let orchestrator = Arc::clone(&self.orchestrator);
                let predecessor = predecessor.clone();
                let poll = self.poll;
                join.spawn(async move { revert_one(orchestrator, predecessor, poll).await });
            }
            while let Some(joined) = join.join_next().await {
                match joined.expect("reversion task panicked") {
                    Ok(result) => {
                        if result.status == RolloutStatus::TimedOut {
                            timed_out.push(result.service.clone());
                        }
                        results.push(result);
                    }
                    Err(error) => {
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                }
            }
        } else {
            for predecessor in predecessors {
                match revert_one(Arc::clone(&self.orchestrator), predecessor.clone(), self.poll)
                    .await
                {
                    Ok(result) => {
                        if result.status == RolloutStatus::TimedOut {
                            timed_out.push(result.service.clone());
                        }
                        results.push(result);
                    }
                    Err(error) => {
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                }
            }
        }

        let outcome = match first_error {
            Some(error) => Err(error),
            None if !timed_out.is_empty() => {
                timed_out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                Err(RollbackError::ReversionTimedOut { services: timed_out })
            }
            None => Ok(()),
        };

        (results, outcome)
    }
}

/// Services touched by this attempt: those whose forward rollout was
/// started. For a manual rollback of a completed attempt, every service
/// with a captured predecessor counts as touched.
fn touched_services(attempt: &DeploymentAttempt) -> Vec<ServiceName> {
    let forward: Vec<ServiceName> = attempt
        .rollouts
        .iter()
        .filter(|r| r.kind == RolloutKind::Forward)
        .map(|r| r.service.clone())
        .collect();

    if !forward.is_empty() {
        return forward;
    }

    attempt
        .predecessors
        .values()
        .map(|p| p.service.clone())
        .collect()
}

/// Revert one service to its captured predecessor and poll to stability.
async fn revert_one(
    orchestrator: Arc<dyn ServiceOrchestrator>,
    predecessor: StablePredecessor,
    poll: PollConfig,
) -> Result<ServiceRolloutResult, RollbackError> {
    let service = predecessor.service.clone();
    let cluster = predecessor.cluster.clone();
    let spec = predecessor.spec_version.clone();

    orchestrator
        .replace_service(&cluster, &service, &spec)
        .await
        .map_err(|e: OrchestratorError| RollbackError::ReversionFailed {
            service: service.clone(),
            detail: e.to_string(),
        })?;

    tracing::info!(%service, %spec, "reversion rollout started");

    let outcome = poll_until(poll, || {
        let orchestrator = Arc::clone(&orchestrator);
        let cluster = cluster.clone();
        let service = service.clone();
        let spec = spec.clone();
        async move {
            let status = orchestrator
                .deployment_status(&cluster, &service, &spec)
                .await
                .map_err(|e| RollbackError::ReversionFailed {
                    service: service.clone(),
                    detail: e.to_string(),
                })?;
            Ok(status.primary_stable().then_some(()))
        }
    })
    .await?;

    let (status, elapsed) = match outcome {
        PollOutcome::Converged { elapsed, .. } => (RolloutStatus::PrimaryStable, elapsed),
        PollOutcome::DeadlineExceeded { elapsed } => (RolloutStatus::TimedOut, elapsed),
    };

    Ok(ServiceRolloutResult {
        service,
        cluster,
        previous_version: None,
        new_version: spec,
        elapsed,
        status,
        kind: RolloutKind::Reversion,
    })
}
