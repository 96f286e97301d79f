// ABOUTME: In-memory fake collaborators shared by the integration tests.
// ABOUTME: Each fake is programmable per scenario and records every call.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use slipway::attempt::InfrastructureSnapshot;
use slipway::backends::{
    ApiProbe, ApiProbeError, ApiResponse, ApplyRequest, Backends, BuildError, CacheStatus,
    DataRestore, DatabaseStatus, DeployMetadata, DeploymentStatus, ImageBuilder, ImageRegistry,
    MetricsError, MetricsSource, OrchestratorError, ProvisionError, Provisioner, RegistryError,
    RestoreError, ServiceOrchestrator, StateLockToken, StoreError, StoreOps, Utilization,
};
use slipway::config::{
    ApiCheckConfig, CacheConfig, ComponentConfig, Config, DatabaseConfig, Environment,
    EnvironmentOverrides, ServiceConfig,
};
use slipway::types::{
    ClusterId, ImageDigest, ImageRef, ServiceName, SnapshotId, SpecVersionId, VersionTag,
};

/// Deterministic digest for a repository name, 64 hex chars.
pub fn digest_for(name: &str) -> ImageDigest {
    let seed: u64 = name.bytes().map(u64::from).sum();
    let hex: String = format!("{seed:016x}").repeat(4);
    ImageDigest::parse(&format!("sha256:{hex}")).unwrap()
}

pub fn version(tag: &str) -> VersionTag {
    VersionTag::parse(tag).unwrap()
}

// =============================================================================
// Builder
// =============================================================================

#[derive(Default)]
pub struct FakeBuilder {
    /// Build contexts, in call order.
    pub builds: Mutex<Vec<PathBuf>>,
    /// Simulated build duration per component repository name.
    pub build_delays: Mutex<HashMap<String, Duration>>,
    /// Repositories whose builds fail.
    pub fail_builds: Mutex<HashSet<String>>,
    /// Fail the availability probe.
    pub unavailable: Mutex<bool>,
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn available(&self) -> Result<(), BuildError> {
        if *self.unavailable.lock() {
            return Err(BuildError::Unavailable("docker not on PATH".to_string()));
        }
        Ok(())
    }

    async fn build(&self, context: &Path, tags: &[ImageRef]) -> Result<ImageDigest, BuildError> {
        let repository = tags[0].name().to_string();

        let delay = self.build_delays.lock().get(&repository).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.builds.lock().push(context.to_path_buf());

        if self.fail_builds.lock().contains(&repository) {
            return Err(BuildError::BuildFailed {
                context: context.display().to_string(),
                detail: "simulated build failure".to_string(),
            });
        }

        Ok(digest_for(&repository))
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
pub struct FakeRegistry {
    /// Image references pushed, in call order.
    pub pushes: Mutex<Vec<String>>,
    /// Per-reference count of transient failures to inject before success.
    pub transient_failures: Mutex<HashMap<String, u32>>,
    /// Remote digest override per repository (digest-mismatch injection).
    pub remote_overrides: Mutex<HashMap<String, ImageDigest>>,
    /// Repositories reported as missing.
    pub missing_repositories: Mutex<HashSet<String>>,
    /// Fail the credentials probe.
    pub bad_credentials: Mutex<bool>,
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn verify_credentials(&self) -> Result<(), RegistryError> {
        if *self.bad_credentials.lock() {
            return Err(RegistryError::AuthenticationFailed(
                "simulated credential failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn repository_exists(&self, repository: &str) -> Result<bool, RegistryError> {
        Ok(!self.missing_repositories.lock().contains(repository))
    }

    async fn push(&self, image: &ImageRef) -> Result<(), RegistryError> {
        let reference = image.to_string();

        let mut failures = self.transient_failures.lock();
        if let Some(remaining) = failures.get_mut(&reference)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(RegistryError::PushFailed("simulated throttle".to_string()));
        }
        drop(failures);

        self.pushes.lock().push(reference);
        Ok(())
    }

    async fn remote_digest(&self, image: &ImageRef) -> Result<ImageDigest, RegistryError> {
        if let Some(digest) = self.remote_overrides.lock().get(image.name()) {
            return Ok(digest.clone());
        }
        Ok(digest_for(image.name()))
    }
}

// =============================================================================
// Provisioner
// =============================================================================

pub struct FakeProvisioner {
    /// Rendered "state": apply stamps the attempt id in, restore replaces it.
    pub state: Mutex<String>,
    pub applies: Mutex<Vec<ApplyRequest>>,
    pub restores: Mutex<Vec<SnapshotId>>,
    pub tags: Mutex<Vec<DeployMetadata>>,
    pub locked: Mutex<bool>,
    pub lock_count: Mutex<u32>,
    pub fail_snapshot: Mutex<bool>,
    pub fail_apply: Mutex<bool>,
    /// Simulated apply duration, for deadline tests.
    pub apply_delay: Mutex<Option<Duration>>,
    pub bad_credentials: Mutex<bool>,
}

impl Default for FakeProvisioner {
    fn default() -> Self {
        Self {
            state: Mutex::new("baseline infrastructure".to_string()),
            applies: Mutex::new(Vec::new()),
            restores: Mutex::new(Vec::new()),
            tags: Mutex::new(Vec::new()),
            locked: Mutex::new(false),
            lock_count: Mutex::new(0),
            fail_snapshot: Mutex::new(false),
            fail_apply: Mutex::new(false),
            apply_delay: Mutex::new(None),
            bad_credentials: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn verify_credentials(&self) -> Result<(), ProvisionError> {
        if *self.bad_credentials.lock() {
            return Err(ProvisionError::CredentialsInvalid(
                "simulated credential failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn snapshot_state(
        &self,
        backup_dir: &Path,
        environment: Environment,
    ) -> Result<InfrastructureSnapshot, ProvisionError> {
        if *self.fail_snapshot.lock() {
            return Err(ProvisionError::SnapshotFailed(
                "simulated snapshot failure".to_string(),
            ));
        }

        let id = SnapshotId::new(format!("snap-{environment}"));
        let location = backup_dir.join(format!("{id}.tfstate"));
        std::fs::create_dir_all(backup_dir)
            .and_then(|_| std::fs::write(&location, self.state.lock().clone()))
            .map_err(|e| ProvisionError::SnapshotFailed(e.to_string()))?;

        Ok(InfrastructureSnapshot {
            id,
            location,
            taken_at: chrono::Utc::now(),
        })
    }

    async fn lock_state(&self) -> Result<StateLockToken, ProvisionError> {
        let mut locked = self.locked.lock();
        if *locked {
            return Err(ProvisionError::LockUnavailable(
                "state lock already held".to_string(),
            ));
        }
        *locked = true;
        *self.lock_count.lock() += 1;
        Ok(StateLockToken("fake-lock".to_string()))
    }

    async fn unlock_state(&self, _token: StateLockToken) -> Result<(), ProvisionError> {
        *self.locked.lock() = false;
        Ok(())
    }

    async fn apply(&self, request: &ApplyRequest) -> Result<(), ProvisionError> {
        let delay = *self.apply_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_apply.lock() {
            return Err(ProvisionError::ApplyFailed(
                "simulated apply failure".to_string(),
            ));
        }

        self.applies.lock().push(request.clone());
        *self.state.lock() = format!(
            "infrastructure for {} {} deployment_tag={}",
            request.environment, request.version, request.attempt_id
        );
        Ok(())
    }

    async fn tag_resources(&self, metadata: &DeployMetadata) -> Result<(), ProvisionError> {
        self.tags.lock().push(metadata.clone());
        Ok(())
    }

    async fn restore_snapshot(
        &self,
        snapshot: &InfrastructureSnapshot,
    ) -> Result<(), ProvisionError> {
        let content = std::fs::read_to_string(&snapshot.location)
            .map_err(|e| ProvisionError::RestoreFailed(e.to_string()))?;
        *self.state.lock() = content;
        self.restores.lock().push(snapshot.id.clone());
        Ok(())
    }

    async fn show_state(&self) -> Result<String, ProvisionError> {
        Ok(self.state.lock().clone())
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Default)]
pub struct FakeOrchestrator {
    /// What active_deployment reports per service (predecessor capture).
    pub active: Mutex<HashMap<String, DeploymentStatus>>,
    /// Every register_spec call: (service, container, image).
    pub registrations: Mutex<Vec<(String, String, String)>>,
    /// Every replace_service call: (service, spec version).
    pub replacements: Mutex<Vec<(String, String)>>,
    /// Polls before a spec reports stable, per service (default 1).
    pub stable_after: Mutex<HashMap<String, u32>>,
    /// Services that never reach running == desired.
    pub never_stable: Mutex<HashSet<String>>,
    /// Poll counter per (service, spec).
    pub polls: Mutex<HashMap<(String, String), u32>>,
    /// Clusters reported unreachable.
    pub unreachable_clusters: Mutex<HashSet<String>>,
    spec_counter: Mutex<u32>,
}

impl FakeOrchestrator {
    /// Seed a service with a stable primary deployment (the predecessor a
    /// rollback would revert to).
    pub fn with_stable_service(self, service: &str, spec: &str, replicas: u32) -> Self {
        self.active.lock().insert(
            service.to_string(),
            DeploymentStatus {
                spec_version: SpecVersionId::new(spec),
                primary: true,
                running: replicas,
                desired: replicas,
            },
        );
        self
    }

    /// Seed a service whose current deployment is not stable, so no
    /// predecessor can be captured for it.
    pub fn with_unstable_service(self, service: &str, spec: &str) -> Self {
        self.active.lock().insert(
            service.to_string(),
            DeploymentStatus {
                spec_version: SpecVersionId::new(spec),
                primary: true,
                running: 0,
                desired: 2,
            },
        );
        self
    }

    pub fn replacements_for(&self, service: &str) -> Vec<String> {
        self.replacements
            .lock()
            .iter()
            .filter(|(s, _)| s == service)
            .map(|(_, spec)| spec.clone())
            .collect()
    }
}

#[async_trait]
impl ServiceOrchestrator for FakeOrchestrator {
    async fn cluster_reachable(&self, cluster: &ClusterId) -> Result<(), OrchestratorError> {
        if self.unreachable_clusters.lock().contains(cluster.as_str()) {
            return Err(OrchestratorError::ClusterNotFound(
                cluster.as_str().to_string(),
            ));
        }
        Ok(())
    }

    async fn active_deployment(
        &self,
        _cluster: &ClusterId,
        service: &ServiceName,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        self.active
            .lock()
            .get(service.as_str())
            .cloned()
            .ok_or_else(|| OrchestratorError::DeploymentNotFound(service.to_string()))
    }

    async fn register_spec(
        &self,
        _cluster: &ClusterId,
        service: &ServiceName,
        container: &str,
        image: &ImageRef,
    ) -> Result<SpecVersionId, OrchestratorError> {
        let mut counter = self.spec_counter.lock();
        *counter += 1;
        let spec = SpecVersionId::new(format!("{service}:{}", 100 + *counter));

        self.registrations.lock().push((
            service.to_string(),
            container.to_string(),
            image.to_string(),
        ));
        Ok(spec)
    }

    async fn replace_service(
        &self,
        _cluster: &ClusterId,
        service: &ServiceName,
        spec: &SpecVersionId,
    ) -> Result<(), OrchestratorError> {
        self.replacements
            .lock()
            .push((service.to_string(), spec.as_str().to_string()));
        Ok(())
    }

    async fn deployment_status(
        &self,
        _cluster: &ClusterId,
        service: &ServiceName,
        spec: &SpecVersionId,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        let key = (service.to_string(), spec.as_str().to_string());
        let mut polls = self.polls.lock();
        let count = polls.entry(key).or_insert(0);
        *count += 1;

        // never_stable applies to newly registered specs; a reversion to the
        // seeded predecessor spec still converges.
        if self.never_stable.lock().contains(service.as_str()) {
            let seeded = self
                .active
                .lock()
                .get(service.as_str())
                .map(|d| d.spec_version.clone());
            if seeded.as_ref() != Some(spec) {
                return Ok(DeploymentStatus {
                    spec_version: spec.clone(),
                    primary: true,
                    running: 1,
                    desired: 2,
                });
            }
        }

        let needed = self
            .stable_after
            .lock()
            .get(service.as_str())
            .copied()
            .unwrap_or(1);

        // Once stable, stays stable: repeated queries never change the
        // reported terminal outcome.
        let stable = *count >= needed;
        Ok(DeploymentStatus {
            spec_version: spec.clone(),
            primary: true,
            running: if stable { 2 } else { 1 },
            desired: 2,
        })
    }
}

// =============================================================================
// Stores, metrics, API probe, restore
// =============================================================================

pub struct FakeStores {
    pub database: Mutex<DatabaseStatus>,
    pub cache: Mutex<CacheStatus>,
}

impl Default for FakeStores {
    fn default() -> Self {
        Self {
            database: Mutex::new(DatabaseStatus {
                available: true,
                free_storage_pct: 55.0,
            }),
            cache: Mutex::new(CacheStatus {
                available: true,
                memory_used_pct: 40.0,
            }),
        }
    }
}

#[async_trait]
impl StoreOps for FakeStores {
    async fn database_status(&self, _identifier: &str) -> Result<DatabaseStatus, StoreError> {
        Ok(self.database.lock().clone())
    }

    async fn cache_status(&self, _cluster_id: &str) -> Result<CacheStatus, StoreError> {
        Ok(self.cache.lock().clone())
    }
}

pub struct FakeMetrics {
    pub monitoring: Mutex<bool>,
    pub utilization: Mutex<Utilization>,
}

impl Default for FakeMetrics {
    fn default() -> Self {
        Self {
            monitoring: Mutex::new(true),
            utilization: Mutex::new(Utilization {
                cpu_pct: 35.0,
                memory_pct: 50.0,
            }),
        }
    }
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn monitoring_enabled(&self, _environment: Environment) -> Result<bool, MetricsError> {
        Ok(*self.monitoring.lock())
    }

    async fn service_utilization(
        &self,
        _cluster: &ClusterId,
        _service: &ServiceName,
    ) -> Result<Utilization, MetricsError> {
        Ok(self.utilization.lock().clone())
    }
}

#[derive(Default)]
pub struct FakeApiProbe {
    /// Scripted responses consumed front-to-back; empty falls back to 200.
    pub script: Mutex<VecDeque<ApiResponse>>,
    pub calls: Mutex<u32>,
}

impl FakeApiProbe {
    pub fn respond(status: u16, latency_ms: u64) -> ApiResponse {
        ApiResponse {
            status,
            latency: Duration::from_millis(latency_ms),
            processing_time: None,
        }
    }

    pub fn push(&self, response: ApiResponse) {
        self.script.lock().push_back(response);
    }
}

#[async_trait]
impl ApiProbe for FakeApiProbe {
    async fn probe(&self) -> Result<ApiResponse, ApiProbeError> {
        *self.calls.lock() += 1;
        Ok(self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Self::respond(200, 100)))
    }
}

#[derive(Default)]
pub struct FakeRestore {
    pub calls: Mutex<Vec<Environment>>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl DataRestore for FakeRestore {
    async fn restore(&self, environment: Environment) -> Result<(), RestoreError> {
        if *self.fail.lock() {
            return Err(RestoreError::Failed("simulated restore failure".to_string()));
        }
        self.calls.lock().push(environment);
        Ok(())
    }
}

// =============================================================================
// Wiring helpers
// =============================================================================

/// All fakes plus the backend bundle built over them.
pub struct Fakes {
    pub builder: Arc<FakeBuilder>,
    pub registry: Arc<FakeRegistry>,
    pub provisioner: Arc<FakeProvisioner>,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub stores: Arc<FakeStores>,
    pub metrics: Arc<FakeMetrics>,
    pub api: Arc<FakeApiProbe>,
    pub restore: Arc<FakeRestore>,
}

impl Fakes {
    pub fn new(orchestrator: FakeOrchestrator) -> Self {
        Self {
            builder: Arc::new(FakeBuilder::default()),
            registry: Arc::new(FakeRegistry::default()),
            provisioner: Arc::new(FakeProvisioner::default()),
            orchestrator: Arc::new(orchestrator),
            stores: Arc::new(FakeStores::default()),
            metrics: Arc::new(FakeMetrics::default()),
            api: Arc::new(FakeApiProbe::default()),
            restore: Arc::new(FakeRestore::default()),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            builder: self.builder.clone(),
            registry: self.registry.clone(),
            provisioner: self.provisioner.clone(),
            orchestrator: self.orchestrator.clone(),
            stores: self.stores.clone(),
            metrics: self.metrics.clone(),
            api: self.api.clone(),
            restore: self.restore.clone(),
        }
    }
}

/// A config with api and worker services rooted in a temp state directory,
/// with an environment section for the given environment.
pub fn test_config(state_dir: &Path, environment: Environment) -> Config {
    let mut config = Config::template();
    config.state_dir = state_dir.to_path_buf();

    config.components = nonempty::NonEmpty::from((
        ComponentConfig {
            name: "api".to_string(),
            context: PathBuf::from("./backend"),
            repository: "arena-api".to_string(),
        },
        vec![ComponentConfig {
            name: "worker".to_string(),
            context: PathBuf::from("./worker"),
            repository: "arena-worker".to_string(),
        }],
    ));

    config.services = nonempty::NonEmpty::from((
        ServiceConfig {
            name: ServiceName::new("api").unwrap(),
            cluster: ClusterId::new("arena-cluster"),
            container: None,
            component: None,
        },
        vec![ServiceConfig {
            name: ServiceName::new("worker").unwrap(),
            cluster: ClusterId::new("arena-cluster"),
            container: None,
            component: None,
        }],
    ));

    config.api_check = Some(ApiCheckConfig {
        host: "api.internal".to_string(),
        port: 8080,
        path: "/api/v1/health".to_string(),
        expect_status: 200,
    });
    config.database = Some(DatabaseConfig {
        identifier: "arena-db".to_string(),
    });
    config.cache = Some(CacheConfig {
        cluster_id: "arena-redis".to_string(),
    });

    // Keep test polling fast in virtual time.
    config.timeouts.rollout_poll_interval = Duration::from_secs(10);
    config.timeouts.rollout = Duration::from_secs(60);
    config.timeouts.infra_apply = Duration::from_secs(600);
    config.timeouts.health_retry_delay = Duration::from_secs(30);
    config.timeouts.push_backoff_base = Duration::from_secs(2);

    config
        .environments
        .insert(environment, EnvironmentOverrides::default());

    config
}

/// An orchestrator pre-seeded with stable predecessors for api and worker.
pub fn seeded_orchestrator() -> FakeOrchestrator {
    FakeOrchestrator::default()
        .with_stable_service("api", "api:42", 2)
        .with_stable_service("worker", "worker:17", 2)
}
