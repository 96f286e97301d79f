// ABOUTME: Container orchestration capability trait.
// ABOUTME: Spec registration, service replacement, and deployment status reads.

use async_trait::async_trait;

use crate::types::{ClusterId, ImageRef, ServiceName, SpecVersionId};

/// One deployment of a spec version for a service, as the orchestrator
/// reports it. `stable` means running equals desired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatus {
    pub spec_version: SpecVersionId,
    pub primary: bool,
    pub running: u32,
    pub desired: u32,
}

impl DeploymentStatus {
    pub fn stable(&self) -> bool {
        self.running == self.desired
    }

    pub fn primary_stable(&self) -> bool {
        self.primary && self.stable()
    }
}

/// Logical-service management on the orchestration API.
#[async_trait]
pub trait ServiceOrchestrator: Send + Sync {
    /// Confirm the cluster exists and is reachable (read-only probe).
    async fn cluster_reachable(&self, cluster: &ClusterId) -> Result<(), OrchestratorError>;

    /// The deployment currently primary for a service.
    async fn active_deployment(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
    ) -> Result<DeploymentStatus, OrchestratorError>;

    /// Register a new spec version binding the named container to the image.
    /// The prior version is superseded, never deleted.
    async fn register_spec(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
        container: &str,
        image: &ImageRef,
    ) -> Result<SpecVersionId, OrchestratorError>;

    /// Point the service at a spec version, forcing a fresh rollout even if
    /// the spec content is otherwise identical.
    async fn replace_service(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
        spec: &SpecVersionId,
    ) -> Result<(), OrchestratorError>;

    /// Status of the given spec version's deployment for a service.
    /// Read-only and idempotent: repeated queries never change the outcome.
    async fn deployment_status(
        &self,
        cluster: &ClusterId,
        service: &ServiceName,
        spec: &SpecVersionId,
    ) -> Result<DeploymentStatus, OrchestratorError>;
}

/// Errors from orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("spec registration failed for {service}: {detail}")]
    RegistrationFailed { service: String, detail: String },

    #[error("service replacement failed for {service}: {detail}")]
    ReplacementFailed { service: String, detail: String },

    #[error("deployment not found for spec version {0}")]
    DeploymentNotFound(String),

    #[error("orchestrator error: {0}")]
    Backend(String),
}
