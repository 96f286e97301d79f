// ABOUTME: Infrastructure applier: snapshot, lock, apply under a deadline,
// ABOUTME: and best-effort deployment-metadata tagging.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::attempt::{InfrastructureApplyResult, InfrastructureSnapshot};
use crate::backends::{ApplyRequest, DeployMetadata, ProvisionError, Provisioner};
use crate::config::Environment;
use crate::diagnostics::{Diagnostics, Warning};

use super::outcome::FailureKind;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("state lock unavailable: {source}")]
    Lock { source: ProvisionError },

    #[error("apply failed: {source}")]
    Apply { source: ProvisionError },

    #[error("apply exceeded its {}s deadline", deadline.as_secs())]
    Timeout { deadline: Duration },

    #[error("snapshot restore failed: {source}")]
    Restore { source: ProvisionError },
}

impl InfraError {
    pub fn kind(&self) -> FailureKind {
        match self {
            InfraError::Lock { .. } | InfraError::Apply { .. } | InfraError::Restore { .. } => {
                FailureKind::TransientInfra
            }
            // The deadline elapsing is failure even if the apply would
            // eventually have converged.
            InfraError::Timeout { .. } => FailureKind::ConvergenceTimeout,
        }
    }
}

/// What the applier produced: the apply record plus the pre-apply snapshot
/// (None when the best-effort snapshot failed).
pub struct InfraOutcome {
    pub result: InfrastructureApplyResult,
    pub snapshot: Option<InfrastructureSnapshot>,
}

/// Applies the declarative plan for one attempt.
pub struct InfrastructureApplier {
    provisioner: Arc<dyn Provisioner>,
}

impl InfrastructureApplier {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }

    /// Snapshot current state, then apply the new plan under the deadline.
    ///
    /// The snapshot is best-effort: failure is recorded as a warning and the
    /// apply proceeds. The state lock is held across the apply and released
    /// on every path, including timeout.
    pub async fn apply(
        &self,
        request: &ApplyRequest,
        backup_dir: &Path,
        deadline: Duration,
        diagnostics: &mut Diagnostics,
    ) -> Result<InfraOutcome, InfraError> {
        let snapshot = match self
            .provisioner
            .snapshot_state(backup_dir, request.environment)
            .await
        {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                diagnostics.warn(Warning::snapshot_failed(format!(
                    "pre-apply state snapshot failed: {e}"
                )));
                None
            }
        };

        let token = self
            .provisioner
            .lock_state()
            .await
            .map_err(|source| InfraError::Lock { source })?;

        let started = Instant::now();
        let applied = tokio::time::timeout(deadline, self.provisioner.apply(request)).await;

        // Release before inspecting the result so no path leaks the lock.
        if let Err(e) = self.provisioner.unlock_state(token).await {
            tracing::warn!("failed to release provisioner state lock: {e}");
        }

        match applied {
            Ok(Ok(())) => {}
            Ok(Err(source)) => return Err(InfraError::Apply { source }),
            Err(_elapsed) => return Err(InfraError::Timeout { deadline }),
        }

        let elapsed = started.elapsed();

        let metadata = DeployMetadata {
            attempt_id: request.attempt_id,
            version: request.version.clone(),
            timestamp: Utc::now(),
        };

        let tagged = match self.provisioner.tag_resources(&metadata).await {
            Ok(()) => true,
            Err(ProvisionError::TaggingUnsupported) => {
                tracing::debug!("backend does not support resource tagging");
                false
            }
            Err(e) => {
                diagnostics.warn(Warning::tagging_failed(format!(
                    "deployment-metadata tagging failed: {e}"
                )));
                false
            }
        };

        Ok(InfraOutcome {
            result: InfrastructureApplyResult {
                applied_at: Utc::now(),
                elapsed,
                tagged,
            },
            snapshot,
        })
    }

    /// Re-apply a pre-deployment snapshot, with the same lock discipline as
    /// a forward apply.
    pub async fn restore(
        &self,
        snapshot: &InfrastructureSnapshot,
        environment: Environment,
    ) -> Result<(), InfraError> {
        tracing::info!(
            snapshot = %snapshot.id,
            %environment,
            "restoring infrastructure state from snapshot"
        );

        let token = self
            .provisioner
            .lock_state()
            .await
            .map_err(|source| InfraError::Lock { source })?;

        let restored = self.provisioner.restore_snapshot(snapshot).await;

        if let Err(e) = self.provisioner.unlock_state(token).await {
            tracing::warn!("failed to release provisioner state lock: {e}");
        }

        restored.map_err(|source| InfraError::Restore { source })
    }
}
