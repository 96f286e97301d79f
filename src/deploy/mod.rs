// ABOUTME: Deployment orchestration: sequential phases, typed outcomes,
// ABOUTME: and the compensating rollback path.

mod artifacts;
mod controller;
mod health;
mod infra;
mod lock;
mod outcome;
mod rollback;
mod rollout;
mod validate;

pub use artifacts::{ArtifactError, ArtifactPipeline};
pub use controller::{AbortFlag, DeployController};
pub use health::{HealthError, HealthVerifier, ServiceTarget};
pub use infra::{InfraError, InfraOutcome, InfrastructureApplier};
pub use lock::{AttemptLock, LockError, LockInfo};
pub use outcome::{DeployError, FailureKind};
pub use rollback::{RollbackController, RollbackError};
pub use rollout::{RolloutController, RolloutError, RolloutTarget};
pub use validate::{ValidationError, ValidationFailure, validate};
