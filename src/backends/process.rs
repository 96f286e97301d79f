// ABOUTME: CLI-backed collaborators: docker builds/pushes, terraform applies,
// ABOUTME: and the opaque shell restore command.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::attempt::InfrastructureSnapshot;
use crate::config::Environment;
use crate::types::{ImageDigest, ImageRef, SnapshotId};

use super::command;
use super::provisioner::{
    ApplyRequest, DeployMetadata, ProvisionError, Provisioner, StateLockToken,
};
use super::registry::{BuildError, ImageBuilder, ImageRegistry, RegistryError};
use super::restore::{DataRestore, RestoreError};

// =============================================================================
// Docker
// =============================================================================

/// Builds and pushes images through the docker CLI.
pub struct DockerCli {
    bin: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            bin: "docker".to_string(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn available(&self) -> Result<(), BuildError> {
        let out = command::run(&self.bin, &["version", "--format", "{{.Server.Version}}"], None, &HashMap::new())
            .await
            .map_err(|e| BuildError::Unavailable(e.to_string()))?;

        if out.success {
            Ok(())
        } else {
            Err(BuildError::Unavailable(out.failure_detail()))
        }
    }

    async fn build(&self, context: &Path, tags: &[ImageRef]) -> Result<ImageDigest, BuildError> {
        let context_str = context.display().to_string();
        let tag_strings: Vec<String> = tags.iter().map(|t| t.to_string()).collect();

        let mut args = vec!["build"];
        for tag in &tag_strings {
            args.push("-t");
            args.push(tag.as_str());
        }
        args.push(context_str.as_str());

        let out = command::run(&self.bin, &args, None, &HashMap::new())
            .await
            .map_err(|e| BuildError::Unavailable(e.to_string()))?;

        if !out.success {
            return Err(BuildError::BuildFailed {
                context: context_str,
                detail: out.failure_detail(),
            });
        }

        // The image ID is the config digest; the registry reports the same
        // digest inside the pushed manifest, which is what remote_digest reads.
        let first_tag = tag_strings
            .first()
            .ok_or_else(|| BuildError::DigestUnavailable("no tags given".to_string()))?;

        let out = command::run(
            &self.bin,
            &["image", "inspect", "--format", "{{.Id}}", first_tag.as_str()],
            None,
            &HashMap::new(),
        )
        .await
        .map_err(|e| BuildError::Unavailable(e.to_string()))?;

        if !out.success {
            return Err(BuildError::DigestUnavailable(out.failure_detail()));
        }

        ImageDigest::parse(out.stdout.trim())
            .map_err(|e| BuildError::DigestUnavailable(e.to_string()))
    }
}

#[async_trait]
impl ImageRegistry for DockerCli {
    async fn verify_credentials(&self) -> Result<(), RegistryError> {
        let out = command::run(&self.bin, &["info", "--format", "{{.ServerVersion}}"], None, &HashMap::new())
            .await
            .map_err(|e| RegistryError::Backend(e.to_string()))?;

        if out.success {
            Ok(())
        } else {
            Err(RegistryError::AuthenticationFailed(out.failure_detail()))
        }
    }

    async fn repository_exists(&self, repository: &str) -> Result<bool, RegistryError> {
        // An access-denied answer means the repository (or our access to it)
        // does not exist; an unknown-manifest answer means it exists but the
        // tag does not, which is fine for an empty repository.
        let reference = format!("{repository}:latest");
        let out = command::run(
            &self.bin,
            &["manifest", "inspect", reference.as_str()],
            None,
            &HashMap::new(),
        )
            .await
            .map_err(|e| RegistryError::Backend(e.to_string()))?;

        if out.success {
            return Ok(true);
        }

        let detail = out.failure_detail().to_lowercase();
        if detail.contains("manifest unknown") || detail.contains("not found: manifest") {
            return Ok(true);
        }
        if detail.contains("denied") || detail.contains("repository does not exist") {
            return Ok(false);
        }
        Err(RegistryError::Backend(out.failure_detail()))
    }

    async fn push(&self, image: &ImageRef) -> Result<(), RegistryError> {
        let reference = image.to_string();
        let out = command::run(&self.bin, &["push", reference.as_str()], None, &HashMap::new())
            .await
            .map_err(|e| RegistryError::Backend(e.to_string()))?;

        if out.success {
            Ok(())
        } else {
            Err(RegistryError::PushFailed(out.failure_detail()))
        }
    }

    async fn remote_digest(&self, image: &ImageRef) -> Result<ImageDigest, RegistryError> {
        let reference = image.to_string();
        let out = command::run(
            &self.bin,
            &["manifest", "inspect", "--verbose", reference.as_str()],
            None,
            &HashMap::new(),
        )
        .await
        .map_err(|e| RegistryError::Backend(e.to_string()))?;

        if !out.success {
            return Err(RegistryError::Backend(out.failure_detail()));
        }

        let value: serde_json::Value = serde_json::from_str(&out.stdout)
            .map_err(|e| RegistryError::Backend(format!("unparseable manifest: {e}")))?;

        // The config digest inside the manifest equals the local image ID.
        let digest = ["SchemaV2Manifest", "OCIManifest"]
            .iter()
            .find_map(|key| value.get(key))
            .and_then(|m| m.pointer("/config/digest"))
            .and_then(|d| d.as_str())
            .ok_or_else(|| RegistryError::DigestUnavailable(reference.clone()))?;

        ImageDigest::parse(digest).map_err(|e| RegistryError::Backend(e.to_string()))
    }
}

// =============================================================================
// Terraform
// =============================================================================

/// Applies declarative infrastructure through the terraform CLI.
pub struct TerraformCli {
    bin: String,
    working_dir: PathBuf,
}

impl TerraformCli {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            bin: "terraform".to_string(),
            working_dir,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<command::CommandOutput, ProvisionError> {
        command::run(&self.bin, args, Some(&self.working_dir), &HashMap::new())
            .await
            .map_err(|e| ProvisionError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl Provisioner for TerraformCli {
    async fn verify_credentials(&self) -> Result<(), ProvisionError> {
        let out = self.run(&["version"]).await?;
        if !out.success {
            return Err(ProvisionError::Unavailable(out.failure_detail()));
        }

        // validate exercises backend and provider config without mutating.
        let out = self.run(&["validate", "-no-color"]).await?;
        if out.success {
            Ok(())
        } else {
            Err(ProvisionError::CredentialsInvalid(out.failure_detail()))
        }
    }

    async fn snapshot_state(
        &self,
        backup_dir: &Path,
        environment: Environment,
    ) -> Result<InfrastructureSnapshot, ProvisionError> {
        let out = self.run(&["state", "pull"]).await?;
        if !out.success {
            return Err(ProvisionError::SnapshotFailed(out.failure_detail()));
        }

        let taken_at = Utc::now();
        let id = SnapshotId::new(format!(
            "{}-{}",
            environment,
            taken_at.format("%Y%m%dT%H%M%SZ")
        ));
        let location = backup_dir.join(format!("{id}.tfstate"));

        std::fs::create_dir_all(backup_dir)
            .and_then(|_| std::fs::write(&location, &out.stdout))
            .map_err(|e| ProvisionError::SnapshotFailed(e.to_string()))?;

        Ok(InfrastructureSnapshot {
            id,
            location,
            taken_at,
        })
    }

    async fn lock_state(&self) -> Result<StateLockToken, ProvisionError> {
        // Terraform takes the backend lock for the duration of each
        // operation; the token exists so callers exercise the
        // acquire/release contract uniformly across provisioners.
        Ok(StateLockToken("terraform-operation-scoped".to_string()))
    }

    async fn unlock_state(&self, _token: StateLockToken) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn apply(&self, request: &ApplyRequest) -> Result<(), ProvisionError> {
        let out = self.run(&["init", "-input=false", "-no-color"]).await?;
        if !out.success {
            return Err(ProvisionError::ApplyFailed(out.failure_detail()));
        }

        let workspace = request.environment.to_string();
        let out = self
            .run(&["workspace", "select", "-or-create", workspace.as_str()])
            .await?;
        if !out.success {
            return Err(ProvisionError::ApplyFailed(out.failure_detail()));
        }

        let version_var = format!("version_tag={}", request.version);
        let attempt_var = format!("deployment_attempt={}", request.attempt_id);
        let out = self
            .run(&[
                "apply",
                "-input=false",
                "-auto-approve",
                "-no-color",
                "-var",
                version_var.as_str(),
                "-var",
                attempt_var.as_str(),
            ])
            .await?;

        if out.success {
            Ok(())
        } else {
            Err(ProvisionError::ApplyFailed(out.failure_detail()))
        }
    }

    async fn tag_resources(&self, metadata: &DeployMetadata) -> Result<(), ProvisionError> {
        // Tagging rides on apply via the deployment variables; configurations
        // that do not consume them simply have nothing to stamp.
        let out = self.run(&["output", "-json"]).await?;
        if !out.success {
            return Err(ProvisionError::TaggingFailed(out.failure_detail()));
        }

        let outputs: serde_json::Value = serde_json::from_str(&out.stdout)
            .map_err(|e| ProvisionError::TaggingFailed(e.to_string()))?;

        match outputs.pointer("/deployment_tag/value").and_then(|v| v.as_str()) {
            Some(tag) if tag.contains(&metadata.attempt_id.to_string()) => Ok(()),
            Some(_) => Err(ProvisionError::TaggingFailed(
                "deployment_tag output does not carry this attempt".to_string(),
            )),
            None => Err(ProvisionError::TaggingUnsupported),
        }
    }

    async fn restore_snapshot(
        &self,
        snapshot: &InfrastructureSnapshot,
    ) -> Result<(), ProvisionError> {
        let location = snapshot.location.display().to_string();
        let out = self
            .run(&["state", "push", "-force", location.as_str()])
            .await?;

        if out.success {
            Ok(())
        } else {
            Err(ProvisionError::RestoreFailed(out.failure_detail()))
        }
    }

    async fn show_state(&self) -> Result<String, ProvisionError> {
        let out = self.run(&["show", "-no-color"]).await?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(ProvisionError::Backend(out.failure_detail()))
        }
    }
}

// =============================================================================
// Shell restore
// =============================================================================

/// Runs the configured restore command as an opaque action.
pub struct ShellRestore {
    command: Option<Vec<String>>,
}

impl ShellRestore {
    pub fn new(command: Option<Vec<String>>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl DataRestore for ShellRestore {
    async fn restore(&self, environment: Environment) -> Result<(), RestoreError> {
        let Some(ref parts) = self.command else {
            return Err(RestoreError::NotConfigured(environment.to_string()));
        };

        let (program, args) = parts
            .split_first()
            .ok_or_else(|| RestoreError::NotConfigured(environment.to_string()))?;

        let mut env = HashMap::new();
        env.insert(
            "SLIPWAY_ENVIRONMENT".to_string(),
            environment.to_string(),
        );

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = command::run(program, &arg_refs, None, &env)
            .await
            .map_err(|e| RestoreError::Failed(e.to_string()))?;

        if out.success {
            Ok(())
        } else {
            Err(RestoreError::Failed(out.failure_detail()))
        }
    }
}
