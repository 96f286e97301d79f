// ABOUTME: Pre-flight environment validation.
// ABOUTME: Read-only probes only; nothing is mutated before all checks pass.

use thiserror::Error;

use crate::backends::Backends;
use crate::config::{Config, Environment};

use super::outcome::FailureKind;

/// One failed pre-flight check, in the order checks run.
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub check: String,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{} pre-flight check(s) failed: {}", failures.len(), summarize(failures))]
    Failed { failures: Vec<ValidationFailure> },
}

fn summarize(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(|f| f.check.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Validation
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        match self {
            ValidationError::Failed { failures } => failures,
        }
    }
}

/// Run every pre-flight check and collect failures in order. The caller
/// aborts the attempt on any failure; no partial-validate retries.
///
/// Takes the un-merged config so the presence of the environment's own
/// section can itself be checked.
pub async fn validate(
    base: &Config,
    environment: Environment,
    backends: &Backends,
) -> Result<(), ValidationError> {
    let mut failures = Vec::new();

    // (a) is enforced by the Environment type; anything parseable is on the
    // allow-list. (c) environment-specific configuration must exist.
    if !base.has_environment(environment) {
        failures.push(ValidationFailure {
            check: "environment-config".to_string(),
            detail: format!("no environments.{environment} section in configuration"),
        });
    }

    let config = base.for_environment(environment);

    // (b) required external tools are callable.
    if let Err(e) = backends.builder.available().await {
        failures.push(ValidationFailure {
            check: "build-tool".to_string(),
            detail: e.to_string(),
        });
    }

    // (d) credentials for the registry and provisioning backends.
    if let Err(e) = backends.registry.verify_credentials().await {
        failures.push(ValidationFailure {
            check: "registry-credentials".to_string(),
            detail: e.to_string(),
        });
    }

    if let Err(e) = backends.provisioner.verify_credentials().await {
        failures.push(ValidationFailure {
            check: "provisioner-credentials".to_string(),
            detail: e.to_string(),
        });
    }

    // (e) referenced repositories exist.
    for component in &config.components {
        match backends.registry.repository_exists(&component.repository).await {
            Ok(true) => {}
            Ok(false) => failures.push(ValidationFailure {
                check: format!("repository/{}", component.repository),
                detail: "repository does not exist in the registry".to_string(),
            }),
            Err(e) => failures.push(ValidationFailure {
                check: format!("repository/{}", component.repository),
                detail: e.to_string(),
            }),
        }
    }

    // Target clusters must be reachable before anything mutates.
    let mut seen = Vec::new();
    for service in &config.services {
        if seen.contains(&service.cluster) {
            continue;
        }
        seen.push(service.cluster.clone());

        if let Err(e) = backends.orchestrator.cluster_reachable(&service.cluster).await {
            failures.push(ValidationFailure {
                check: format!("cluster/{}", service.cluster),
                detail: e.to_string(),
            });
        }
    }

    // Every service must map to a buildable component.
    for service in &config.services {
        if config.component(service.component_name()).is_none() {
            failures.push(ValidationFailure {
                check: format!("service/{}", service.name),
                detail: format!(
                    "references component '{}' which is not configured",
                    service.component_name()
                ),
            });
        }
    }

    // The API probe needs a target once verification runs.
    if config.api_check.is_none() {
        failures.push(ValidationFailure {
            check: "api-check".to_string(),
            detail: "no api_check target configured for this environment".to_string(),
        });
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Failed { failures })
    }
}
