// ABOUTME: Configuration types and parsing for slipway.yml.
// ABOUTME: Handles YAML parsing, environment merging, and path defaults.

mod env_value;
mod environment;
mod thresholds;

pub use env_value::EnvValue;
pub use environment::{Environment, UnknownEnvironment};
pub use thresholds::Thresholds;

use crate::error::{Error, Result};
use crate::types::{ClusterId, ServiceName};
use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "slipway.yml";
pub const CONFIG_FILENAME_ALT: &str = "slipway.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".slipway/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Project name, used in plan metadata and report headers.
    pub project: String,

    /// Cloud region the provisioner and orchestrator operate in.
    pub region: EnvValue,

    /// Registry host images are pushed to (e.g. an ECR endpoint).
    pub registry: EnvValue,

    /// Components built and pushed by the artifact pipeline.
    pub components: NonEmpty<ComponentConfig>,

    /// Logical services rolled out by the orchestrator.
    pub services: NonEmpty<ServiceConfig>,

    /// Build independent components in parallel.
    #[serde(default = "default_true")]
    pub parallel_build: bool,

    /// Revert services in parallel during rollback.
    #[serde(default = "default_true")]
    pub parallel_rollback: bool,

    /// Directory for locks, audit log, persisted attempts, and reports.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Directory holding the declarative infrastructure definitions.
    #[serde(default = "default_infra_dir")]
    pub infra_dir: PathBuf,

    /// Where infrastructure state snapshots are kept. Defaults under state_dir.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// Where the JSON health report is written. Defaults under state_dir.
    #[serde(default)]
    pub report_path: Option<PathBuf>,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub thresholds: Thresholds,

    /// Target of the synthetic end-to-end API check.
    #[serde(default)]
    pub api_check: Option<ApiCheckConfig>,

    /// Data store checked by the health battery.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Cache layer checked by the health battery.
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Opaque command invoked when rollback requires a data restore.
    #[serde(default)]
    pub restore_command: Option<Vec<String>>,

    /// Whether this release carries schema/data changes that require a data
    /// restore on rollback.
    #[serde(default)]
    pub restore_on_rollback: bool,

    /// Per-environment overrides, merged over the top-level values.
    #[serde(default)]
    pub environments: HashMap<Environment, EnvironmentOverrides>,
}

/// One buildable component: a build context and the repository it pushes to.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    pub context: PathBuf,
    pub repository: String,
}

/// One logical service to roll out.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: ServiceName,

    #[serde(deserialize_with = "deserialize_cluster")]
    pub cluster: ClusterId,

    /// Container within the specification whose image is substituted.
    /// Defaults to the service name.
    #[serde(default)]
    pub container: Option<String>,

    /// Component whose artifact this service runs. Defaults to the service name.
    #[serde(default)]
    pub component: Option<String>,
}

impl ServiceConfig {
    pub fn container_name(&self) -> &str {
        self.container.as_deref().unwrap_or(self.name.as_str())
    }

    pub fn component_name(&self) -> &str {
        self.component.as_deref().unwrap_or(self.name.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    /// Deadline for the whole infrastructure apply.
    #[serde(default = "default_apply_deadline", with = "humantime_serde")]
    pub infra_apply: Duration,

    /// Deadline for a service rollout to become primary and stable.
    #[serde(default = "default_rollout_deadline", with = "humantime_serde")]
    pub rollout: Duration,

    /// Interval between rollout status polls.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub rollout_poll_interval: Duration,

    /// Full health-battery attempts before declaring failure.
    #[serde(default = "default_health_retries")]
    pub health_retries: u32,

    /// Delay between health-battery attempts.
    #[serde(default = "default_health_retry_delay", with = "humantime_serde")]
    pub health_retry_delay: Duration,

    /// Push attempts per artifact before giving up.
    #[serde(default = "default_push_attempts")]
    pub push_attempts: u32,

    /// Base backoff delay after a failed push, doubled per attempt.
    #[serde(default = "default_push_backoff_base", with = "humantime_serde")]
    pub push_backoff_base: Duration,

    /// Cap on the push backoff delay.
    #[serde(default = "default_push_backoff_cap", with = "humantime_serde")]
    pub push_backoff_cap: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            infra_apply: default_apply_deadline(),
            rollout: default_rollout_deadline(),
            rollout_poll_interval: default_poll_interval(),
            health_retries: default_health_retries(),
            health_retry_delay: default_health_retry_delay(),
            push_attempts: default_push_attempts(),
            push_backoff_base: default_push_backoff_base(),
            push_backoff_cap: default_push_backoff_cap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiCheckConfig {
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    #[serde(default = "default_api_path")]
    pub path: String,

    #[serde(default = "default_api_status")]
    pub expect_status: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub identifier: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub cluster_id: String,
}

/// Overrides applied on top of the base config for one environment.
/// Lists replace wholesale; scalar options replace when present.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnvironmentOverrides {
    #[serde(default)]
    pub region: Option<EnvValue>,

    #[serde(default)]
    pub registry: Option<EnvValue>,

    #[serde(default)]
    pub components: Option<NonEmpty<ComponentConfig>>,

    #[serde(default)]
    pub services: Option<NonEmpty<ServiceConfig>>,

    #[serde(default)]
    pub parallel_build: Option<bool>,

    #[serde(default)]
    pub parallel_rollback: Option<bool>,

    #[serde(default)]
    pub timeouts: Option<TimeoutsConfig>,

    #[serde(default)]
    pub thresholds: Option<Thresholds>,

    #[serde(default)]
    pub api_check: Option<ApiCheckConfig>,

    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub cache: Option<CacheConfig>,

    #[serde(default)]
    pub restore_command: Option<Vec<String>>,

    #[serde(default)]
    pub restore_on_rollback: Option<bool>,
}

fn default_true() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".slipway")
}

fn default_infra_dir() -> PathBuf {
    PathBuf::from("infra")
}

fn default_apply_deadline() -> Duration {
    Duration::from_secs(600)
}

fn default_rollout_deadline() -> Duration {
    Duration::from_secs(600)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_health_retries() -> u32 {
    3
}

fn default_health_retry_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_push_attempts() -> u32 {
    3
}

fn default_push_backoff_base() -> Duration {
    Duration::from_secs(2)
}

fn default_push_backoff_cap() -> Duration {
    Duration::from_secs(30)
}

fn default_api_port() -> u16 {
    80
}

fn default_api_path() -> String {
    "/health".to_string()
}

fn default_api_status() -> u16 {
    200
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Whether the config carries an entry for the given environment.
    /// Absence is reported by the validator, not here.
    pub fn has_environment(&self, environment: Environment) -> bool {
        self.environments.contains_key(&environment)
    }

    /// Merge the overrides for an environment over the base values.
    /// An environment with no entry yields the base config unchanged; the
    /// validator turns that into a pre-flight failure.
    pub fn for_environment(&self, environment: Environment) -> Config {
        let mut merged = self.clone();

        let Some(overrides) = self.environments.get(&environment) else {
            return merged;
        };

        if let Some(ref region) = overrides.region {
            merged.region = region.clone();
        }
        if let Some(ref registry) = overrides.registry {
            merged.registry = registry.clone();
        }
        if let Some(ref components) = overrides.components {
            merged.components = components.clone();
        }
        if let Some(ref services) = overrides.services {
            merged.services = services.clone();
        }
        if let Some(parallel_build) = overrides.parallel_build {
            merged.parallel_build = parallel_build;
        }
        if let Some(parallel_rollback) = overrides.parallel_rollback {
            merged.parallel_rollback = parallel_rollback;
        }
        if let Some(ref timeouts) = overrides.timeouts {
            merged.timeouts = timeouts.clone();
        }
        if let Some(ref thresholds) = overrides.thresholds {
            merged.thresholds = thresholds.clone();
        }
        if overrides.api_check.is_some() {
            merged.api_check = overrides.api_check.clone();
        }
        if overrides.database.is_some() {
            merged.database = overrides.database.clone();
        }
        if overrides.cache.is_some() {
            merged.cache = overrides.cache.clone();
        }
        if overrides.restore_command.is_some() {
            merged.restore_command = overrides.restore_command.clone();
        }
        if let Some(restore_on_rollback) = overrides.restore_on_rollback {
            merged.restore_on_rollback = restore_on_rollback;
        }

        merged
    }

    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join("health-report.json"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("backups"))
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.state_dir.join("audit.log")
    }

    /// Look up a component by name; services reference components this way.
    pub fn component(&self, name: &str) -> Option<&ComponentConfig> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Minimal config used as a fixture by tests.
    pub fn template() -> Self {
        Config {
            project: "arena".to_string(),
            region: EnvValue::Literal("us-east-1".to_string()),
            registry: EnvValue::Literal("registry.example.com".to_string()),
            components: NonEmpty::new(ComponentConfig {
                name: "api".to_string(),
                context: PathBuf::from("./backend"),
                repository: "arena-api".to_string(),
            }),
            services: NonEmpty::new(ServiceConfig {
                name: ServiceName::new("api").unwrap(),
                cluster: ClusterId::new("arena-staging"),
                container: None,
                component: None,
            }),
            parallel_build: true,
            parallel_rollback: true,
            state_dir: default_state_dir(),
            infra_dir: default_infra_dir(),
            backup_dir: None,
            report_path: None,
            timeouts: TimeoutsConfig::default(),
            thresholds: Thresholds::default(),
            api_check: None,
            database: None,
            cache: None,
            restore_command: None,
            restore_on_rollback: false,
            environments: HashMap::new(),
        }
    }
}

fn deserialize_cluster<'de, D>(deserializer: D) -> std::result::Result<ClusterId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        return Err(serde::de::Error::custom("cluster cannot be empty"));
    }
    Ok(ClusterId::new(s))
}
