// ABOUTME: Rollout controller: register new spec versions, force replacement
// ABOUTME: rollouts, and poll each service to primary-and-stable in parallel.

use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::attempt::{RolloutKind, RolloutStatus, ServiceRolloutResult};
use crate::backends::{OrchestratorError, ServiceOrchestrator};
use crate::config::ServiceConfig;
use crate::poll::{PollConfig, PollOutcome, poll_until};
use crate::types::{ClusterId, ImageRef, ServiceName, SpecVersionId};

use super::outcome::FailureKind;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("spec registration failed for {service}: {source}")]
    Registration {
        service: ServiceName,
        source: OrchestratorError,
    },

    #[error("replacement failed for {service}: {source}")]
    Replacement {
        service: ServiceName,
        source: OrchestratorError,
    },

    #[error("status query failed for {service}: {source}")]
    StatusQuery {
        service: ServiceName,
        source: OrchestratorError,
    },

    #[error("rollout timed out for: {}", services.iter().map(ServiceName::as_str).collect::<Vec<_>>().join(", "))]
    TimedOut { services: Vec<ServiceName> },
}

impl RolloutError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RolloutError::Registration { .. }
            | RolloutError::Replacement { .. }
            | RolloutError::StatusQuery { .. } => FailureKind::TransientInfra,
            RolloutError::TimedOut { .. } => FailureKind::ConvergenceTimeout,
        }
    }
}

/// What one service rollout needs: its config entry and the pushed artifact.
pub struct RolloutTarget {
    pub service: ServiceConfig,
    pub image: ImageRef,
}

/// Rolls out every target service for one attempt.
pub struct RolloutController {
    orchestrator: Arc<dyn ServiceOrchestrator>,
    poll: PollConfig,
}

impl RolloutController {
    pub fn new(orchestrator: Arc<dyn ServiceOrchestrator>, poll: PollConfig) -> Self {
        Self { orchestrator, poll }
    }

    /// For each service in order: register the new spec version, force a
    /// replacement rollout, and spawn a poll to primary-and-stable.
    ///
    /// Registration is sequential; a hard failure starts no further
    /// services. Polls run in parallel and always run to completion, so the
    /// end state is deterministic even when one service fails.
    pub async fn run(
        &self,
        targets: &[RolloutTarget],
    ) -> (Vec<ServiceRolloutResult>, Result<(), RolloutError>) {
        let mut polls = JoinSet::new();
        let mut hard_error: Option<RolloutError> = None;

        for target in targets {
            match self.start_one(target).await {
                Ok(started) => {
                    let orchestrator = Arc::clone(&self.orchestrator);
                    let poll = self.poll;
                    polls.spawn(async move { watch_one(orchestrator, started, poll).await });
                }
                Err(error) => {
                    // No further services are started, but in-flight polls
                    // below still resolve.
                    hard_error = Some(error);
                    break;
                }
            }
        }

        let mut results = Vec::new();
        let mut timed_out = Vec::new();
        while let Some(joined) = polls.join_next().await {
            match joined.expect("rollout poll task panicked") {
                Ok(result) => {
                    if result.status == RolloutStatus::TimedOut {
                        timed_out.push(result.service.clone());
                    }
                    results.push(result);
                }
                Err(error) => {
                    if hard_error.is_none() {
                        hard_error = Some(error);
                    }
                }
            }
        }

        let outcome = match hard_error {
            Some(error) => Err(error),
            None if !timed_out.is_empty() => {
                timed_out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                Err(RolloutError::TimedOut { services: timed_out })
            }
            None => Ok(()),
        };

        (results, outcome)
    }

    /// Resolve the current spec, register the new version, and trigger the
    /// replacement. The prior version is superseded, never deleted.
    async fn start_one(&self, target: &RolloutTarget) -> Result<StartedRollout, RolloutError> {
        let service = &target.service.name;
        let cluster = &target.service.cluster;

        let previous = match self.orchestrator.active_deployment(cluster, service).await {
            Ok(status) => Some(status.spec_version),
            // A service with no prior deployment is a first rollout.
            Err(OrchestratorError::DeploymentNotFound(_)) => None,
            Err(source) => {
                return Err(RolloutError::StatusQuery {
                    service: service.clone(),
                    source,
                });
            }
        };

        let new_version = self
            .orchestrator
            .register_spec(
                cluster,
                service,
                target.service.container_name(),
                &target.image,
            )
            .await
            .map_err(|source| RolloutError::Registration {
                service: service.clone(),
                source,
            })?;

        // Forced even when the spec content is otherwise identical, so
        // config-only changes still produce a fresh rollout.
        self.orchestrator
            .replace_service(cluster, service, &new_version)
            .await
            .map_err(|source| RolloutError::Replacement {
                service: service.clone(),
                source,
            })?;

        tracing::info!(%service, %new_version, "replacement rollout started");

        Ok(StartedRollout {
            service: service.clone(),
            cluster: cluster.clone(),
            previous,
            new_version,
        })
    }
}

struct StartedRollout {
    service: ServiceName,
    cluster: ClusterId,
    previous: Option<SpecVersionId>,
    new_version: SpecVersionId,
}

/// Poll one service until its new spec version is primary and stable or the
/// deadline elapses. The query is read-only; repeating it never changes the
/// reported outcome.
async fn watch_one(
    orchestrator: Arc<dyn ServiceOrchestrator>,
    started: StartedRollout,
    poll: PollConfig,
) -> Result<ServiceRolloutResult, RolloutError> {
    let outcome = poll_until(poll, || {
        let orchestrator = Arc::clone(&orchestrator);
        let cluster = started.cluster.clone();
        let service = started.service.clone();
        let spec = started.new_version.clone();
        async move {
            let status = orchestrator
                .deployment_status(&cluster, &service, &spec)
                .await
                .map_err(|source| RolloutError::StatusQuery {
                    service: service.clone(),
                    source,
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
        service: started.service,
        cluster: started.cluster,
        previous_version: started.previous,
        new_version: started.new_version,
        elapsed,
        status,
        kind: RolloutKind::Forward,
    })
}
