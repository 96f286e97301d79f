// ABOUTME: Database restore capability trait.
// ABOUTME: An opaque action invoked only when rollback requires it.

use async_trait::async_trait;

use crate::config::Environment;

/// Opaque backup/restore facility. The controller never inspects what the
/// restore does; it only triggers it and observes success or failure.
#[async_trait]
pub trait DataRestore: Send + Sync {
    async fn restore(&self, environment: Environment) -> Result<(), RestoreError>;
}

/// Errors from the restore collaborator.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("no restore command configured for {0}")]
    NotConfigured(String),

    #[error("restore failed: {0}")]
    Failed(String),
}
