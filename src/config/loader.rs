//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate: base file, optional
//! environment file, then environment variable overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::SchedulerConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE: &str = "scheduler.toml";
const ENV_PREFIX: &str = "ICEPROD";
const ENV_SEPARATOR: &str = "__";

/// Loaded configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: SchedulerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that must not touch process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading scheduler configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        let manager = ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        };

        info!(
            environment = environment,
            datastore = %manager.config.datastore.base_url,
            cycle_timeout_seconds = manager.config.materialization.cycle_timeout_seconds,
            "Configuration loaded successfully"
        );
        debug!(config = %manager.debug_config(), "Effective configuration");

        Ok(Arc::new(manager))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: SchedulerConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with secret-looking fields masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        sanitize_json_recursive(&mut value, &["password", "secret", "token", "credential"]);
        if let Some(url) = value
            .pointer_mut("/pgmq/database_url")
            .and_then(|v| v.as_str().map(mask_url_credentials))
        {
            value["pgmq"]["database_url"] = serde_json::Value::String(url);
        }
        value
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<SchedulerConfig> {
        let base = config_directory.join(BASE_FILE);
        let overlay = config_directory.join(format!("scheduler.{environment}.toml"));

        let config = Config::builder()
            .add_source(File::from(base.clone()).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::LoadError {
                source_description: base.display().to_string(),
                error: e.to_string(),
            })?;

        Ok(config.try_deserialize::<SchedulerConfig>()?)
    }

    fn detect_environment() -> String {
        env::var("ICEPROD_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var("ICEPROD_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}

fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_sensitive = sensitive_patterns.iter().any(|p| key_lower.contains(p));
                if is_sensitive && !val.is_null() {
                    *val = serde_json::Value::String("[MASKED]".to_string());
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}

/// `postgresql://user:pw@host/db` -> `postgresql://***@host/db`
fn mask_url_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();
        assert_eq!(manager.config(), &SchedulerConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("scheduler.toml"),
            r#"
[materialization]
cycle_timeout_seconds = 60
default_num_jobs = 50

[queue_admission]
max_per_cycle = 250
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("scheduler.production.toml"),
            r#"
[materialization]
cycle_timeout_seconds = 300
"#,
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "production")
                .unwrap();
        let config = manager.config();
        assert_eq!(config.materialization.cycle_timeout_seconds, 300);
        assert_eq!(config.materialization.default_num_jobs, 50);
        assert_eq!(config.queue_admission.max_per_cycle, 250);
        assert_eq!(config.queue_admission.overfetch_factor, 5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("scheduler.toml"),
            "[queue_admission]\nbulk_batch_size = 0\n",
        )
        .unwrap();
        let result = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_debug_config_masks_secrets() {
        let mut config = SchedulerConfig::default();
        config.datastore.auth_token = Some("abcdef123456".to_string());
        config.pgmq.database_url = "postgresql://iceprod:hunter2@db:5432/iceprod".to_string();
        let manager = ConfigManager::from_config(config, "test").unwrap();

        let rendered = manager.debug_config().to_string();
        assert!(!rendered.contains("abcdef123456"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("postgresql://***@db:5432/iceprod"));
    }
}
