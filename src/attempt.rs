// ABOUTME: Data model for one end-to-end deployment attempt.
// ABOUTME: Owns the attempt record, per-phase results, and JSON persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Environment;
use crate::types::{ClusterId, ImageDigest, ImageRef, ServiceName, SnapshotId, SpecVersionId, VersionTag};

/// Lifecycle of a deployment attempt. The attempt is terminal once it
/// reaches `Succeeded` or `Failed` and is never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Validating,
    Building,
    ApplyingInfra,
    RollingOut,
    Verifying,
    Succeeded,
    RollingBack,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Succeeded | AttemptStatus::Failed)
    }

    /// Statuses during which a second attempt for the same environment must
    /// not be started.
    pub fn excludes_concurrent_attempt(&self) -> bool {
        matches!(
            self,
            AttemptStatus::RollingOut | AttemptStatus::Verifying | AttemptStatus::RollingBack
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Validating => "VALIDATING",
            AttemptStatus::Building => "BUILDING",
            AttemptStatus::ApplyingInfra => "APPLYING_INFRA",
            AttemptStatus::RollingOut => "ROLLING_OUT",
            AttemptStatus::Verifying => "VERIFYING",
            AttemptStatus::Succeeded => "SUCCEEDED",
            AttemptStatus::RollingBack => "ROLLING_BACK",
            AttemptStatus::Failed => "FAILED",
        }
    }
}

/// A built artifact: image reference plus content digests.
///
/// Invariant: the artifact counts as pushed only when the remote digest is
/// present and byte-for-byte equal to the local one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBuild {
    pub component: String,
    pub context: PathBuf,
    pub image: ImageRef,
    pub local_digest: ImageDigest,
    pub remote_digest: Option<ImageDigest>,
    pub push_attempts: u32,
}

impl ArtifactBuild {
    pub fn is_pushed(&self) -> bool {
        self.remote_digest.as_ref() == Some(&self.local_digest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutStatus {
    PrimaryStable,
    TimedOut,
}

/// Whether a rollout entry was the forward deployment or a rollback reversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutKind {
    Forward,
    Reversion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRolloutResult {
    pub service: ServiceName,
    pub cluster: ClusterId,
    pub previous_version: Option<SpecVersionId>,
    pub new_version: SpecVersionId,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub status: RolloutStatus,
    pub kind: RolloutKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub check: String,
    pub target: String,
    pub passed: bool,
    /// Advisory checks degrade the report but never fail the gate.
    pub required: bool,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub detail: String,
}

impl HealthCheckResult {
    /// Whether this result counts against the aggregate health gate.
    pub fn gates(&self) -> bool {
        self.required && !self.passed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureApplyResult {
    pub applied_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Whether deployment-metadata tagging succeeded (best-effort).
    pub tagged: bool,
}

/// Point-in-time copy of the provisioner's persisted state, taken before an
/// apply. Rollback source of truth for infrastructure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureSnapshot {
    pub id: SnapshotId,
    pub location: PathBuf,
    pub taken_at: DateTime<Utc>,
}

/// The specification version that was primary and fully stable for a service
/// immediately before this attempt began. Captured before any mutation;
/// rollback never re-queries the orchestrator for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StablePredecessor {
    pub service: ServiceName,
    pub cluster: ClusterId,
    pub spec_version: SpecVersionId,
    pub running: u32,
    pub desired: u32,
    pub captured_at: DateTime<Utc>,
}

/// One end-to-end deployment run, identified by its correlation id.
/// Mutated only by the controller that owns the current phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub correlation_id: Uuid,
    pub environment: Environment,
    pub version: VersionTag,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactBuild>,

    #[serde(default)]
    pub infra: Option<InfrastructureApplyResult>,

    #[serde(default)]
    pub rollouts: Vec<ServiceRolloutResult>,

    #[serde(default)]
    pub health: Vec<HealthCheckResult>,

    /// Keyed by service name for stable JSON map keys.
    #[serde(default)]
    pub predecessors: BTreeMap<String, StablePredecessor>,

    #[serde(default)]
    pub snapshot: Option<InfrastructureSnapshot>,

    /// Set when a phase determines schema/data changes require a restore on
    /// rollback.
    #[serde(default)]
    pub needs_data_restore: bool,
}

impl DeploymentAttempt {
    pub fn new(environment: Environment, version: VersionTag) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            environment,
            version,
            status: AttemptStatus::Validating,
            started_at: Utc::now(),
            finished_at: None,
            artifacts: Vec::new(),
            infra: None,
            rollouts: Vec::new(),
            health: Vec::new(),
            predecessors: BTreeMap::new(),
            snapshot: None,
            needs_data_restore: false,
        }
    }

    pub fn set_status(&mut self, status: AttemptStatus) {
        debug_assert!(!self.status.is_terminal(), "terminal attempts are frozen");
        self.status = status;
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Aggregate health: pass iff every required check passed.
    pub fn health_passed(&self) -> bool {
        !self.health.is_empty() && !self.health.iter().any(HealthCheckResult::gates)
    }
}

#[derive(Debug, Error)]
pub enum AttemptStoreError {
    #[error("I/O error persisting attempt: {0}")]
    Io(#[from] std::io::Error),

    #[error("attempt record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk store for attempt records, one file per environment holding the
/// most recent attempt. The standalone rollback command reads this to
/// recover captured predecessors and the snapshot reference.
#[derive(Debug, Clone)]
pub struct AttemptStore {
    dir: PathBuf,
}

impl AttemptStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("attempts"),
        }
    }

    fn path_for(&self, environment: Environment) -> PathBuf {
        self.dir.join(format!("{environment}.json"))
    }

    pub fn save(&self, attempt: &DeploymentAttempt) -> Result<(), AttemptStoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(attempt)?;
        std::fs::write(self.path_for(attempt.environment), json)?;
        Ok(())
    }

    pub fn load_last(
        &self,
        environment: Environment,
    ) -> Result<Option<DeploymentAttempt>, AttemptStoreError> {
        let path = self.path_for(environment);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}
