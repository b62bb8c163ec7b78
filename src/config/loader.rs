//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles config file discovery,
//! environment detection and layering of file and environment variable
//! sources through the `config` crate.

use super::error::{ConfigResult, ConfigurationError};
use super::BatchConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE_STEM: &str = "tasker-batch";
const ENV_PREFIX: &str = "TASKER_BATCH";

/// Loaded configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: BatchConfig,
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

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_layered(&config_directory, environment)?;
        config.validate()?;

        let manager = ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        };

        info!(
            environment = %environment,
            database_url = %sanitize_database_url(&manager.config.database.url),
            job_name = %manager.config.job.name,
            chunk_size = manager.config.job.import.chunk_size,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(manager))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: BatchConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials masked, for logs and diagnostics
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self.config);
        if let Some(url) = value.pointer_mut("/database/url") {
            if let Some(raw) = url.as_str() {
                *url = serde_json::Value::String(sanitize_database_url(raw));
            }
        }
        value
    }

    /// Detect current environment from environment variables
    fn detect_environment() -> String {
        env::var("TASKER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();
        for extension in ["yaml", "yml"] {
            let path = config_directory.join(format!("{CONFIG_FILE_STEM}.{extension}"));
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(path);
            }
            searched_paths.push(path);
        }
        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    fn load_layered(config_directory: &Path, environment: &str) -> ConfigResult<BatchConfig> {
        let base = Self::find_config_file(config_directory)?;
        let overlay = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.yaml"));

        if overlay.is_file() {
            debug!(path = %overlay.display(), "Applying environment overlay");
        }

        let layered = Config::builder()
            .add_source(File::from(base.as_path()).format(FileFormat::Yaml))
            .add_source(
                File::from(overlay.as_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(base.display().to_string(), e))?;

        layered
            .try_deserialize::<BatchConfig>()
            .map_err(|e| ConfigurationError::load_error(base.display().to_string(), e))
    }
}

/// Mask the password component of a database URL
pub fn sanitize_database_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.rfind('@') else {
        return url.to_string();
    };
    let credentials = &rest[..at];
    match credentials.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &url[..scheme_end + 3],
            &credentials[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}
