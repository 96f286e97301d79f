// ABOUTME: Infrastructure provisioner capability trait.
// ABOUTME: Snapshot, lock, apply, tag, and restore declarative resource state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use uuid::Uuid;

use crate::attempt::InfrastructureSnapshot;
use crate::config::Environment;
use crate::types::VersionTag;

/// Everything the provisioner needs to compute and apply a plan.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub environment: Environment,
    pub version: VersionTag,
    pub attempt_id: Uuid,
}

/// Deployment metadata stamped onto touched resources after an apply.
#[derive(Debug, Clone)]
pub struct DeployMetadata {
    pub attempt_id: Uuid,
    pub version: VersionTag,
    pub timestamp: DateTime<Utc>,
}

/// Token handed out while the provisioner's state lock is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLockToken(pub String);

/// Declarative infrastructure provisioning.
///
/// The caller must hold the state lock across `apply` and `restore_snapshot`
/// and must release it on every exit path, including failure.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Confirm the tool is callable and credentials work (read-only probe).
    async fn verify_credentials(&self) -> Result<(), ProvisionError>;

    /// Copy the current persisted state into the backup directory.
    async fn snapshot_state(
        &self,
        backup_dir: &Path,
        environment: Environment,
    ) -> Result<InfrastructureSnapshot, ProvisionError>;

    /// Acquire the backend state lock.
    async fn lock_state(&self) -> Result<StateLockToken, ProvisionError>;

    /// Release a previously acquired state lock. Safe to call on failure
    /// paths where the underlying operation may have died mid-flight.
    async fn unlock_state(&self, token: StateLockToken) -> Result<(), ProvisionError>;

    /// Initialize the backend, select or create the environment workspace,
    /// compute a plan, and apply it. The caller enforces the deadline.
    async fn apply(&self, request: &ApplyRequest) -> Result<(), ProvisionError>;

    /// Stamp resources touched by this attempt with deployment metadata.
    /// Callers treat failure as non-fatal.
    async fn tag_resources(&self, metadata: &DeployMetadata) -> Result<(), ProvisionError>;

    /// Re-apply a previously taken snapshot; the rollback target.
    async fn restore_snapshot(
        &self,
        snapshot: &InfrastructureSnapshot,
    ) -> Result<(), ProvisionError>;

    /// Render the current persisted state (read-only).
    async fn show_state(&self) -> Result<String, ProvisionError>;
}

/// Errors from provisioner operations.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("provisioning tool unavailable: {0}")]
    Unavailable(String),

    #[error("provisioner credentials invalid: {0}")]
    CredentialsInvalid(String),

    #[error("state snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("state lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("apply failed: {0}")]
    ApplyFailed(String),

    #[error("resource tagging unsupported for this backend")]
    TaggingUnsupported,

    #[error("resource tagging failed: {0}")]
    TaggingFailed(String),

    #[error("snapshot restore failed: {0}")]
    RestoreFailed(String),

    #[error("provisioner error: {0}")]
    Backend(String),
}
