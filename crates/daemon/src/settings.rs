//! Daemon settings
//!
//! Layered with the `config` crate: built-in defaults, then `jobflow.toml` (or `--config`),
//! then `JOBFLOW__SECTION__KEY` environment variables.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use jobflow_core::application::worker::constants::HEARTBEAT_INTERVAL;
use jobflow_core::domain::{ImportConfig, JobType, JobTypeConfig};
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::MaintenanceConfig;
use jobflow_infra_http::HttpOutboundConfig;
use jobflow_infra_sqlite::DEFAULT_MAX_CONNECTIONS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "jobflow.toml";
const ENV_PREFIX: &str = "JOBFLOW";
const DEFAULT_DATABASE_URL: &str = "sqlite://~/.jobflow/jobflow.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub database_url: String,
    pub max_connections: u32,
}

impl StorageSettings {
    /// Database URL with a leading `~` in the path expanded
    pub fn expanded_database_url(&self) -> String {
        match self.database_url.strip_prefix("sqlite://") {
            Some(path) => format!("sqlite://{}", shellexpand::tilde(path)),
            None => shellexpand::tilde(&self.database_url).into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Daily-rotated log files go here when set
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// ACTIVE jobs with no start or heartbeat inside this window are orphaned; unset keeps
    /// the engine default of five minutes
    #[serde(default)]
    pub window_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub storage: StorageSettings,
    pub log: LogSettings,
    pub pools: BTreeMap<String, JobTypeConfig>,
    pub import: ImportConfig,
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub recovery: RecoverySettings,
    pub outbound: HttpOutboundConfig,
}

fn well_known_types() -> [JobType; 4] {
    [
        JobType::import(),
        JobType::notification(),
        JobType::generation(),
        JobType::cache_warm(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageSettings {
                backend: StorageBackend::Sqlite,
                database_url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_MAX_CONNECTIONS,
            },
            log: LogSettings {
                format: LogFormat::Pretty,
                directory: None,
            },
            pools: well_known_types()
                .into_iter()
                .map(|ty| (ty.to_string(), JobTypeConfig::defaults_for(&ty)))
                .collect(),
            import: ImportConfig::default(),
            maintenance: MaintenanceConfig::default(),
            recovery: RecoverySettings::default(),
            outbound: HttpOutboundConfig::default(),
        }
    }
}

/// Register every scalar leaf of `value` as a default under its dotted key
fn register_defaults(
    mut builder: ConfigBuilder<DefaultState>,
    key: &str,
    value: &serde_json::Value,
) -> std::result::Result<ConfigBuilder<DefaultState>, config::ConfigError> {
    use serde_json::Value;

    match value {
        Value::Object(fields) => {
            for (name, field) in fields {
                let path = if key.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", key, name)
                };
                builder = register_defaults(builder, &path, field)?;
            }
            Ok(builder)
        }
        Value::Bool(b) => builder.set_default(key, *b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => builder.set_default(key, i),
            None => builder.set_default(key, n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => builder.set_default(key, s.as_str()),
        Value::Null | Value::Array(_) => Ok(builder),
    }
}

fn config_error(err: config::ConfigError) -> AppError {
    AppError::Config(err.to_string())
}

impl Settings {
    /// Load defaults, the config file and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = serde_json::to_value(Settings::default())?;
        let builder = register_defaults(Config::builder(), "", &defaults).map_err(config_error)?;

        let file = match path {
            Some(path) => File::new(&path.to_string_lossy(), FileFormat::Toml).required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };

        let settings: Settings = builder
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.max_connections == 0 {
            return Err(AppError::Config(
                "storage.max_connections must be at least 1".into(),
            ));
        }
        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.database_url.trim().is_empty()
        {
            return Err(AppError::Config("storage.database_url is empty".into()));
        }
        if self.log.directory.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(AppError::Config("log.directory is empty".into()));
        }

        // Shorter windows would take live jobs from other processes between heartbeats
        let min_window = 2 * HEARTBEAT_INTERVAL.as_secs();
        if self.recovery.window_secs.is_some_and(|w| w < min_window) {
            return Err(AppError::Config(format!(
                "recovery.window_secs must be at least {}",
                min_window
            )));
        }

        self.import
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let known = well_known_types();
        for (name, pool) in &self.pools {
            if !known.iter().any(|ty| ty.as_str() == name) {
                return Err(AppError::Config(format!("pools.{}: unknown job type", name)));
            }
            pool.validate()
                .map_err(|e| AppError::Config(format!("pools.{}: {}", name, e)))?;
        }
        Ok(())
    }

    /// Pool settings for a type, falling back to its built-in defaults
    pub fn pool(&self, job_type: &JobType) -> JobTypeConfig {
        self.pools
            .get(job_type.as_str())
            .cloned()
            .unwrap_or_else(|| JobTypeConfig::defaults_for(job_type))
    }

    pub fn recovery_window_ms(&self) -> Option<i64> {
        self.recovery
            .window_secs
            .map(|secs| i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.pool(&JobType::import()).concurrency, 2);
        assert_eq!(settings.pool(&JobType::notification()).concurrency, 10);
        assert_eq!(settings.recovery_window_ms(), None);
        assert_eq!(settings.import.batch_size, 100);
    }

    #[test]
    fn test_partial_pool_override_keeps_type_defaults() {
        let file = write_config(
            r#"
            [storage]
            backend = "memory"

            [pools.import]
            concurrency = 3

            [pools.generation.rate_limit]
            capacity = 2
            refill_tokens = 1
            "#,
        );
        let settings = Settings::load(Some(file.path())).unwrap();

        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        let import = settings.pool(&JobType::import());
        assert_eq!(import.concurrency, 3);
        assert_eq!(import.execution_budget_secs, 15 * 60);

        let limit = settings.pool(&JobType::generation()).rate_limit.unwrap();
        assert_eq!((limit.capacity, limit.refill_tokens), (2, 1));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let file = write_config("[import]\nbatch_size = 5000\n");
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(AppError::Config(_))
        ));

        let file = write_config("[pools.reports]\nconcurrency = 1\n");
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_recovery_window_must_outlast_heartbeats() {
        let file = write_config("[recovery]\nwindow_secs = 0\n");
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(AppError::Config(_))
        ));

        let file = write_config("[recovery]\nwindow_secs = 600\n");
        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.recovery_window_ms(), Some(600_000));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_tilde_expansion() {
        let storage = StorageSettings {
            backend: StorageBackend::Sqlite,
            database_url: "sqlite://~/jobs.db".into(),
            max_connections: 1,
        };
        assert!(!storage.expanded_database_url().contains('~'));
        assert!(storage.expanded_database_url().starts_with("sqlite://"));
    }
}
