// ABOUTME: Failure taxonomy and the unified deployment error.
// ABOUTME: The controller branches on the kind, never on message strings.

use snafu::Snafu;

use super::artifacts::ArtifactError;
use super::health::HealthError;
use super::infra::InfraError;
use super::lock::LockError;
use super::rollback::RollbackError;
use super::rollout::RolloutError;
use super::validate::ValidationError;

/// The bucket a failure belongs to. Lower-level components return typed
/// outcomes naming their bucket; the controller decides whether to retry,
/// escalate to rollback, or terminate based solely on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Pre-flight failure. Fatal immediately, never retried.
    Validation,
    /// Registry pushes, API throttling. Retried with bounded backoff;
    /// exhaustion escalates.
    TransientInfra,
    /// Digest mismatch after push. Signals corruption, never retried.
    Integrity,
    /// An apply, rollout, or verification exceeded its deadline.
    ConvergenceTimeout,
    /// No stable predecessor to revert to. Requires operator intervention.
    RollbackImpossible,
    /// The reversion itself failed. Most severe outcome.
    RollbackFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::TransientInfra => "transient-infrastructure",
            FailureKind::Integrity => "integrity",
            FailureKind::ConvergenceTimeout => "convergence-timeout",
            FailureKind::RollbackImpossible => "rollback-impossible",
            FailureKind::RollbackFailed => "rollback-failed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified deployment error naming the phase that failed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DeployError {
    #[snafu(display("another attempt holds the environment: {source}"))]
    Exclusion { source: LockError },

    #[snafu(display("pre-flight validation failed: {source}"))]
    Validation { source: ValidationError },

    #[snafu(display("artifact pipeline failed: {source}"))]
    Artifacts { source: ArtifactError },

    #[snafu(display("infrastructure apply failed: {source}"))]
    Infra { source: InfraError },

    #[snafu(display("rollout failed: {source}"))]
    Rollout { source: RolloutError },

    #[snafu(display("health verification failed: {source}"))]
    Verification { source: HealthError },

    #[snafu(display("rollback failed: {source}"))]
    Rollback { source: RollbackError },

    #[snafu(display("attempt aborted before rollout began"))]
    Aborted,
}

impl DeployError {
    /// The taxonomy bucket for this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            // Refusing to start and operator aborts are pre-flight outcomes.
            DeployError::Exclusion { .. } | DeployError::Aborted => FailureKind::Validation,
            DeployError::Validation { source } => source.kind(),
            DeployError::Artifacts { source } => source.kind(),
            DeployError::Infra { source } => source.kind(),
            DeployError::Rollout { source } => source.kind(),
            DeployError::Verification { source } => source.kind(),
            DeployError::Rollback { source } => source.kind(),
        }
    }

    /// The phase name used in the terminal summary.
    pub fn phase(&self) -> &'static str {
        match self {
            DeployError::Exclusion { .. } => "exclusion",
            DeployError::Validation { .. } => "validation",
            DeployError::Artifacts { .. } => "build",
            DeployError::Infra { .. } => "infrastructure",
            DeployError::Rollout { .. } => "rollout",
            DeployError::Verification { .. } => "verification",
            DeployError::Rollback { .. } => "rollback",
            DeployError::Aborted => "abort",
        }
    }

    /// Process exit code. `2` distinguishes a failed rollback (actively
    /// broken) from failures that completed a rollback or had none to
    /// attempt (degraded but stable).
    pub fn exit_code(&self) -> i32 {
        if self.kind() == FailureKind::RollbackFailed {
            2
        } else {
            1
        }
    }
}
