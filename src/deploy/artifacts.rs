// ABOUTME: Artifact pipeline: parallel image builds, pushes with backoff,
// ABOUTME: and byte-for-byte digest verification against the registry.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::attempt::ArtifactBuild;
use crate::backends::{BuildError, ImageBuilder, ImageRegistry, RegistryError};
use crate::config::{ComponentConfig, TimeoutsConfig};
use crate::types::{ImageDigest, ImageRef, ParseImageRefError, VersionTag};

use super::outcome::FailureKind;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid image reference for {component}: {source}")]
    InvalidReference {
        component: String,
        source: ParseImageRefError,
    },

    #[error("build failed for {component}: {source}")]
    Build {
        component: String,
        source: BuildError,
    },

    #[error("push exhausted for {component} after {attempts} attempt(s): {source}")]
    PushExhausted {
        component: String,
        attempts: u32,
        source: RegistryError,
    },

    #[error("digest mismatch for {component}: local {local}, remote {remote}")]
    DigestMismatch {
        component: String,
        local: ImageDigest,
        remote: ImageDigest,
    },
}

impl ArtifactError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ArtifactError::InvalidReference { .. } => FailureKind::Validation,
            ArtifactError::Build { .. } | ArtifactError::PushExhausted { .. } => {
                FailureKind::TransientInfra
            }
            // A mismatch signals corruption, not unavailability.
            ArtifactError::DigestMismatch { .. } => FailureKind::Integrity,
        }
    }
}

/// Builds and pushes every component's image for one attempt.
pub struct ArtifactPipeline {
    builder: Arc<dyn ImageBuilder>,
    registry: Arc<dyn ImageRegistry>,
}

impl ArtifactPipeline {
    pub fn new(builder: Arc<dyn ImageBuilder>, registry: Arc<dyn ImageRegistry>) -> Self {
        Self { builder, registry }
    }

    /// Build all components (in parallel unless the flag forces sequential),
    /// then push each with bounded backoff and verify digests.
    ///
    /// Returns every completed `ArtifactBuild` in component order along with
    /// the overall outcome. A failed sub-task never cancels its siblings;
    /// the pipeline resolves fully before reporting.
    pub async fn run(
        &self,
        components: &[ComponentConfig],
        registry_host: &str,
        version: &VersionTag,
        parallel: bool,
        timeouts: &TimeoutsConfig,
    ) -> (Vec<ArtifactBuild>, Result<(), ArtifactError>) {
        let (mut artifacts, build_failure) = self
            .build_all(components, registry_host, version, parallel)
            .await;

        if let Some(error) = build_failure {
            return (artifacts, Err(error));
        }

        let push_failure = self.push_all(&mut artifacts, parallel, timeouts).await;

        (artifacts, push_failure)
    }

    async fn build_all(
        &self,
        components: &[ComponentConfig],
        registry_host: &str,
        version: &VersionTag,
        parallel: bool,
    ) -> (Vec<ArtifactBuild>, Option<ArtifactError>) {
        let mut outcomes: Vec<(usize, Result<ArtifactBuild, ArtifactError>)> =
            Vec::with_capacity(components.len());

        if parallel {
            let mut join = JoinSet::new();
            for (index, component) in components.iter().enumerate() {
                let builder = Arc::clone(&self.builder);
                let component = component.clone();
                let host = registry_host.to_string();
                let version = version.clone();
                join.spawn(async move {
                    (index, build_one(builder, component, &host, &version).await)
                });
            }
            while let Some(joined) = join.join_next().await {
                outcomes.push(joined.expect("build task panicked"));
            }
        } else {
            for (index, component) in components.iter().enumerate() {
                let result = build_one(
                    Arc::clone(&self.builder),
                    component.clone(),
                    registry_host,
                    version,
                )
                .await;
                outcomes.push((index, result));
            }
        }

        // Results are recorded in component order regardless of completion order.
        outcomes.sort_by_key(|(index, _)| *index);

        let mut artifacts = Vec::new();
        let mut first_error = None;
        for (_, outcome) in outcomes {
            match outcome {
                Ok(artifact) => artifacts.push(artifact),
                Err(error) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        (artifacts, first_error)
    }

    async fn push_all(
        &self,
        artifacts: &mut [ArtifactBuild],
        parallel: bool,
        timeouts: &TimeoutsConfig,
    ) -> Result<(), ArtifactError> {
        let settings = PushSettings::from(timeouts);

        if parallel {
            let mut join = JoinSet::new();
            for (index, artifact) in artifacts.iter().enumerate() {
                let registry = Arc::clone(&self.registry);
                let artifact = artifact.clone();
                let settings = settings.clone();
                join.spawn(async move { (index, push_one(registry, artifact, settings).await) });
            }

            let mut first_error = None;
            while let Some(joined) = join.join_next().await {
                let (index, outcome) = joined.expect("push task panicked");
                match outcome {
                    Ok(pushed) => artifacts[index] = pushed,
                    Err((failed, error)) => {
                        artifacts[index] = failed;
                        // Integrity failures outrank exhausted retries.
                        let replace = match (&first_error, &error) {
                            (None, _) => true,
                            (Some(ArtifactError::DigestMismatch { .. }), _) => false,
                            (Some(_), ArtifactError::DigestMismatch { .. }) => true,
                            _ => false,
                        };
                        if replace {
                            first_error = Some(error);
                        }
                    }
                }
            }

            match first_error {
                None => Ok(()),
                Some(error) => Err(error),
            }
        } else {
            for index in 0..artifacts.len() {
                let outcome = push_one(
                    Arc::clone(&self.registry),
                    artifacts[index].clone(),
                    settings.clone(),
                )
                .await;
                match outcome {
                    Ok(pushed) => artifacts[index] = pushed,
                    Err((failed, error)) => {
                        artifacts[index] = failed;
                        return Err(error);
                    }
                }
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
struct PushSettings {
    attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl From<&TimeoutsConfig> for PushSettings {
    fn from(timeouts: &TimeoutsConfig) -> Self {
        Self {
            attempts: timeouts.push_attempts.max(1),
            backoff_base: timeouts.push_backoff_base,
            backoff_cap: timeouts.push_backoff_cap,
        }
    }
}

async fn build_one(
    builder: Arc<dyn ImageBuilder>,
    component: ComponentConfig,
    registry_host: &str,
    version: &VersionTag,
) -> Result<ArtifactBuild, ArtifactError> {
    let image = ImageRef::for_repository(Some(registry_host), &component.repository, version)
        .map_err(|source| ArtifactError::InvalidReference {
            component: component.name.clone(),
            source,
        })?;
    let alias = image.with_tag("latest");

    let local_digest = builder
        .build(&component.context, &[image.clone(), alias])
        .await
        .map_err(|source| ArtifactError::Build {
            component: component.name.clone(),
            source,
        })?;

    Ok(ArtifactBuild {
        component: component.name,
        context: component.context,
        image,
        local_digest,
        remote_digest: None,
        push_attempts: 0,
    })
}

/// Push one artifact with bounded exponential backoff, then compare the
/// registry's reported digest byte-for-byte against the local one. A
/// mismatch is a hard failure, distinct from a transient push failure, and
/// is never retried.
async fn push_one(
    registry: Arc<dyn ImageRegistry>,
    mut artifact: ArtifactBuild,
    settings: PushSettings,
) -> Result<ArtifactBuild, (ArtifactBuild, ArtifactError)> {
    let mut delay = settings.backoff_base;
    let mut last_error: Option<RegistryError> = None;

    for attempt in 1..=settings.attempts {
        artifact.push_attempts = attempt;

        if attempt > 1 {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(settings.backoff_cap);
        }

        // The remote digest read participates in the retry loop: a registry
        // that cannot report a digest has not completed the push.
        let pushed = match registry.push(&artifact.image).await {
            Ok(()) => registry.remote_digest(&artifact.image).await,
            Err(e) => Err(e),
        };

        match pushed {
            Ok(remote) => {
                if remote != artifact.local_digest {
                    let error = ArtifactError::DigestMismatch {
                        component: artifact.component.clone(),
                        local: artifact.local_digest.clone(),
                        remote: remote.clone(),
                    };
                    artifact.remote_digest = Some(remote);
                    return Err((artifact, error));
                }

                artifact.remote_digest = Some(remote);

                // The floating alias rides along; it points at the same
                // blobs, so it gets no digest gate of its own.
                let alias = artifact.image.with_tag("latest");
                if let Err(e) = registry.push(&alias).await {
                    tracing::warn!(
                        component = %artifact.component,
                        "failed to push floating alias: {e}"
                    );
                }

                return Ok(artifact);
            }
            Err(e) => {
                tracing::debug!(
                    component = %artifact.component,
                    attempt,
                    "push attempt failed: {e}"
                );
                last_error = Some(e);
            }
        }
    }

    let error = ArtifactError::PushExhausted {
        component: artifact.component.clone(),
        attempts: settings.attempts,
        source: last_error
            .unwrap_or_else(|| RegistryError::PushFailed("no attempts made".to_string())),
    };
    Err((artifact, error))
}
