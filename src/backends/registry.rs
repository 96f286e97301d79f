// ABOUTME: Image builder and registry capability traits.
// ABOUTME: Build images with digests, push them, and read back remote digests.

use async_trait::async_trait;
use std::path::Path;

use crate::types::{ImageDigest, ImageRef};

/// Builds container images from a build context.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Confirm the build tool is callable (read-only probe).
    async fn available(&self) -> Result<(), BuildError>;

    /// Build one image and apply every given tag to it. Returns the local
    /// content digest of the built artifact.
    async fn build(&self, context: &Path, tags: &[ImageRef]) -> Result<ImageDigest, BuildError>;
}

/// Registry operations: existence probes, pushes, and remote digests.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Confirm registry credentials work (read-only probe).
    async fn verify_credentials(&self) -> Result<(), RegistryError>;

    /// Whether the named repository exists in the registry.
    async fn repository_exists(&self, repository: &str) -> Result<bool, RegistryError>;

    /// Push one tag. Transient failures are the caller's to retry.
    async fn push(&self, image: &ImageRef) -> Result<(), RegistryError>;

    /// The content digest the registry reports for a pushed tag.
    async fn remote_digest(&self, image: &ImageRef) -> Result<ImageDigest, RegistryError>;
}

/// Errors from image builds.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build tool unavailable: {0}")]
    Unavailable(String),

    #[error("build failed for context {context}: {detail}")]
    BuildFailed { context: String, detail: String },

    #[error("built image has no readable digest: {0}")]
    DigestUnavailable(String),
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("push failed: {0}")]
    PushFailed(String),

    #[error("registry did not report a digest for {0}")]
    DigestUnavailable(String),

    #[error("registry error: {0}")]
    Backend(String),
}
