//! TOML launch configuration.
//!
//! Every field has a default, so a missing file or an empty one yields a usable
//! configuration. Durations are written in milliseconds.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::http::{HttpDocumentSource, HttpSourceDefinition};
use crate::document_source::SourceRegistry;
use crate::governor::{GovernorPolicy, QuotaPolicy, RateGovernor};
use crate::universe::UniverseSpec;
use crate::worker::WorkerConfig;
use crate::{ConfigError, DocumentType, SourceId, WarehouseConfig};

/// Root of `docharvest.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub universe: UniverseSection,
    #[serde(default)]
    pub warehouse: WarehouseSection,
    #[serde(default)]
    pub coordination: CoordinationSection,
    #[serde(default)]
    pub governor: GovernorSection,
    #[serde(default)]
    pub sources: Vec<HttpSourceDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_wait_ms: default_max_wait_ms(),
            progress_every: default_progress_every(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseSection {
    #[serde(default = "default_min_year")]
    pub min_year: u16,
    #[serde(default = "default_max_year")]
    pub max_year: u16,
    #[serde(default = "default_document_types")]
    pub document_types: Vec<DocumentType>,
}

impl Default for UniverseSection {
    fn default() -> Self {
        Self {
            min_year: default_min_year(),
            max_year: default_max_year(),
            document_types: default_document_types(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSection {
    /// Defaults to `<home>/warehouse.duckdb`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub max_pool_size: Option<usize>,
    #[serde(default)]
    pub open_retries: Option<u32>,
    #[serde(default)]
    pub open_retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationSection {
    /// Defaults to `<home>/locks`.
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
}

/// Default governor policy plus `[governor.sources.<id>]` overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorSection {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,
    #[serde(default = "default_recovery_streak")]
    pub recovery_streak: u32,
    #[serde(default = "default_cooldown_threshold")]
    pub cooldown_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_network_retry_delay_ms")]
    pub network_retry_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default)]
    pub quota_limit: Option<u32>,
    #[serde(default = "default_quota_window_ms")]
    pub quota_window_ms: u64,
    #[serde(default)]
    pub sources: BTreeMap<String, PolicyOverride>,
}

impl Default for GovernorSection {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            decay_factor: default_decay_factor(),
            recovery_streak: default_recovery_streak(),
            cooldown_threshold: default_cooldown_threshold(),
            cooldown_ms: default_cooldown_ms(),
            network_retry_delay_ms: default_network_retry_delay_ms(),
            jitter_ms: default_jitter_ms(),
            quota_limit: None,
            quota_window_ms: default_quota_window_ms(),
            sources: BTreeMap::new(),
        }
    }
}

impl GovernorSection {
    pub fn policy(&self) -> GovernorPolicy {
        GovernorPolicy {
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            decay_factor: self.decay_factor,
            recovery_streak: self.recovery_streak,
            cooldown_threshold: self.cooldown_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
            network_retry_delay: Duration::from_millis(self.network_retry_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            quota: self.quota_limit.map(|limit| QuotaPolicy {
                window: Duration::from_millis(self.quota_window_ms),
                limit,
            }),
        }
    }
}

/// Per-source governor settings; unset fields inherit from `[governor]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub min_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub decay_factor: Option<f64>,
    pub recovery_streak: Option<u32>,
    pub cooldown_threshold: Option<u32>,
    pub cooldown_ms: Option<u64>,
    pub network_retry_delay_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub quota_limit: Option<u32>,
    pub quota_window_ms: Option<u64>,
}

impl PolicyOverride {
    pub fn apply(&self, base: &GovernorPolicy) -> GovernorPolicy {
        let millis = |value: Option<u64>, fallback: Duration| {
            value.map_or(fallback, Duration::from_millis)
        };

        let quota = match (self.quota_limit, base.quota) {
            (Some(limit), base_quota) => Some(QuotaPolicy {
                window: millis(
                    self.quota_window_ms,
                    base_quota.map_or(Duration::from_secs(60), |quota| quota.window),
                ),
                limit,
            }),
            (None, Some(base_quota)) => Some(QuotaPolicy {
                window: millis(self.quota_window_ms, base_quota.window),
                limit: base_quota.limit,
            }),
            (None, None) => None,
        };

        GovernorPolicy {
            min_delay: millis(self.min_delay_ms, base.min_delay),
            max_delay: millis(self.max_delay_ms, base.max_delay),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            decay_factor: self.decay_factor.unwrap_or(base.decay_factor),
            recovery_streak: self.recovery_streak.unwrap_or(base.recovery_streak),
            cooldown_threshold: self.cooldown_threshold.unwrap_or(base.cooldown_threshold),
            cooldown: millis(self.cooldown_ms, base.cooldown),
            network_retry_delay: millis(self.network_retry_delay_ms, base.network_retry_delay),
            jitter: millis(self.jitter_ms, base.jitter),
            quota,
        }
    }
}

impl HarvestConfig {
    /// Read and parse a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Reject settings that would make a run misbehave, before any unit is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.max_attempts == 0 {
            return Err(ConfigError::InvalidWorker(String::from(
                "max_attempts must be at least 1",
            )));
        }
        if self.worker.fetch_timeout_ms == 0 {
            return Err(ConfigError::InvalidWorker(String::from(
                "fetch_timeout_ms must be greater than 0",
            )));
        }

        self.universe_spec().validate()?;
        let governor = self.rate_governor()?;
        governor.validate()?;

        let longest_wait = governor.longest_wait();
        if Duration::from_millis(self.worker.max_wait_ms) < longest_wait {
            return Err(ConfigError::InvalidWorker(format!(
                "max_wait_ms ({}) is shorter than the longest governor wait ({}ms); \
                 units would fail instead of waiting out cooldowns and quotas",
                self.worker.max_wait_ms,
                longest_wait.as_millis()
            )));
        }

        for definition in &self.sources {
            definition.validate()?;
        }
        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_attempts: self.worker.max_attempts,
            fetch_timeout: Duration::from_millis(self.worker.fetch_timeout_ms),
            max_wait: Duration::from_millis(self.worker.max_wait_ms),
            progress_every: self.worker.progress_every,
        }
    }

    pub fn universe_spec(&self) -> UniverseSpec {
        UniverseSpec {
            min_year: self.universe.min_year,
            max_year: self.universe.max_year,
            document_types: self.universe.document_types.clone(),
        }
    }

    /// Warehouse settings; `db_override` takes precedence over `[warehouse].db_path`.
    pub fn warehouse_config(&self, db_override: Option<&Path>) -> WarehouseConfig {
        let mut config = WarehouseConfig::default();
        if let Some(path) = db_override.map(Path::to_path_buf).or_else(|| self.warehouse.db_path.clone()) {
            config.db_path = path;
        }
        if let Some(size) = self.warehouse.max_pool_size {
            config.max_pool_size = size;
        }
        if let Some(retries) = self.warehouse.open_retries {
            config.open_retries = retries;
        }
        if let Some(delay) = self.warehouse.open_retry_delay_ms {
            config.open_retry_delay = Duration::from_millis(delay);
        }
        config
    }

    pub fn lock_dir(&self, home: &Path) -> PathBuf {
        self.coordination
            .lock_dir
            .clone()
            .unwrap_or_else(|| home.join("locks"))
    }

    /// Governor with the default policy and every per-source override.
    pub fn rate_governor(&self) -> Result<RateGovernor, ConfigError> {
        let base = self.governor.policy();
        let mut governor = RateGovernor::new(base.clone());
        for (source, settings) in &self.governor.sources {
            let source_id = SourceId::parse(source)?;
            governor = governor.with_source_policy(source_id, settings.apply(&base));
        }
        Ok(governor)
    }

    /// HTTP adapters in declaration order, which is also fallback order.
    ///
    /// Each adapter paces its session warm-up through `governor`.
    pub fn source_registry(&self, governor: &Arc<RateGovernor>) -> Result<SourceRegistry, ConfigError> {
        let mut registry = SourceRegistry::new();
        for definition in &self.sources {
            let source = HttpDocumentSource::from_definition(definition.clone())?
                .with_governor(Arc::clone(governor));
            registry.register(Arc::new(source));
        }
        Ok(registry)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_max_wait_ms() -> u64 {
    600_000
}

fn default_progress_every() -> usize {
    10
}

fn default_min_year() -> u16 {
    2015
}

fn default_max_year() -> u16 {
    2026
}

fn default_document_types() -> Vec<DocumentType> {
    DocumentType::ALL.to_vec()
}

fn default_min_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_decay_factor() -> f64 {
    0.85
}

fn default_recovery_streak() -> u32 {
    1
}

fn default_cooldown_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    120_000
}

fn default_network_retry_delay_ms() -> u64 {
    2_000
}

fn default_jitter_ms() -> u64 {
    500
}

fn default_quota_window_ms() -> u64 {
    60_000
}
