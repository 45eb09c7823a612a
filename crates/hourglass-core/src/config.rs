use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCHEDULER_NAME: &str = "SIMPLE";
pub const ENV_PREFIX: &str = "HOURGLASS_";

/// Top-level config (hourglass.toml + HOURGLASS_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HourglassConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where the process / queue / table metadata lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Scheduling subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Named backends; schedules pick one through their `scheduler_name`.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
    /// Environment tag matched against a schedule's `variant_filters`.
    #[serde(default)]
    pub environment: Option<String>,
    /// When set, RescheduleAllJobs runs on this cadence so entities that
    /// failed at startup get another chance without a restart.
    #[serde(default)]
    pub reconcile_interval_secs: Option<u64>,
    /// Run setup-all on `serve` (default: true).
    #[serde(default = "bool_true")]
    pub setup_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            environment: None,
            reconcile_interval_secs: None,
            setup_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    pub name: String,
    pub kind: BackendKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// In-process timers, one task per job.
    Simple,
    /// tokio-cron-scheduler engine.
    Enterprise,
}

fn bool_true() -> bool {
    true
}

fn default_backends() -> Vec<BackendConfig> {
    vec![BackendConfig {
        name: DEFAULT_SCHEDULER_NAME.to_string(),
        kind: BackendKind::Simple,
    }]
}

fn hourglass_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.hourglass", home)
}

fn default_db_path() -> String {
    format!("{}/hourglass.db", hourglass_home())
}

fn default_metadata_path() -> String {
    format!("{}/metadata.toml", hourglass_home())
}

fn default_config_path() -> String {
    format!("{}/hourglass.toml", hourglass_home())
}

impl HourglassConfig {
    /// Load config from a TOML file with HOURGLASS_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `HOURGLASS_SCHEDULER__RECONCILE_INTERVAL_SECS=300`.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.hourglass/hourglass.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: HourglassConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| crate::error::HourglassError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would make schedules ambiguous.
    pub fn validate(&self) -> crate::error::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for backend in &self.scheduler.backends {
            if backend.name.trim().is_empty() {
                return Err(crate::error::HourglassError::Config(
                    "scheduler backend name must not be empty".to_string(),
                ));
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(crate::error::HourglassError::Config(format!(
                    "duplicate scheduler backend name: {}",
                    backend.name
                )));
            }
        }
        if self.scheduler.reconcile_interval_secs == Some(0) {
            return Err(crate::error::HourglassError::Config(
                "scheduler.reconcile_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
