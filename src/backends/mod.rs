// ABOUTME: Capability traits for external collaborators and their
// ABOUTME: production implementations (docker, terraform, AWS CLIs, hyper).

mod api;
mod aws;
mod command;
mod metrics;
mod orchestrator;
mod process;
mod provisioner;
mod registry;
mod restore;
mod stores;

pub use api::{ApiProbe, ApiProbeError, ApiResponse, HyperApiProbe, UnconfiguredApiProbe};
pub use aws::AwsCli;
pub use metrics::{MetricsError, MetricsSource, Utilization};
pub use orchestrator::{DeploymentStatus, OrchestratorError, ServiceOrchestrator};
pub use process::{DockerCli, ShellRestore, TerraformCli};
pub use provisioner::{
    ApplyRequest, DeployMetadata, ProvisionError, Provisioner, StateLockToken,
};
pub use registry::{BuildError, ImageBuilder, ImageRegistry, RegistryError};
pub use restore::{DataRestore, RestoreError};
pub use stores::{CacheStatus, DatabaseStatus, StoreError, StoreOps};

use std::sync::Arc;

/// The full set of collaborators one attempt runs against. Phases receive
/// only the narrow capabilities they need; this bundle is wiring.
#[derive(Clone)]
pub struct Backends {
    pub builder: Arc<dyn ImageBuilder>,
    pub registry: Arc<dyn ImageRegistry>,
    pub provisioner: Arc<dyn Provisioner>,
    pub orchestrator: Arc<dyn ServiceOrchestrator>,
    pub stores: Arc<dyn StoreOps>,
    pub metrics: Arc<dyn MetricsSource>,
    pub api: Arc<dyn ApiProbe>,
    pub restore: Arc<dyn DataRestore>,
}
