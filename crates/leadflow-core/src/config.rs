//! Configuration management for Leadflow.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration.
///
/// This is loaded from `~/.config/leadflow/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database location and pool settings
    pub database: DatabaseConfig,
    /// Company-data provider connection settings
    pub provider: ProviderConfig,
    /// Staging, charging and job lifecycle settings
    pub pipeline: PipelineConfig,
    /// Background worker settings
    pub worker: WorkerConfig,
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults if absent.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `LEADFLOW_DATABASE_PATH`: Override the SQLite database path
    /// - `LEADFLOW_PROVIDER_BASE_URL`: Override the provider base URL
    /// - `LEADFLOW_PROVIDER_API_KEY`: Provide the provider API key
    /// - `LEADFLOW_DETAIL_COST`: Override credits charged per lead detail
    /// - `LEADFLOW_WORKER_INTERVAL_SECS`: Override the worker tick interval
    pub fn load_with_env(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEADFLOW_*` overrides using the given variable lookup.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("LEADFLOW_DATABASE_PATH") {
            tracing::debug!("Override database.path from env: {}", val);
            self.database.path = val;
        }

        if let Some(val) = lookup("LEADFLOW_PROVIDER_BASE_URL") {
            tracing::debug!("Override provider.base_url from env: {}", val);
            self.provider.base_url = val;
        }

        if let Some(val) = lookup("LEADFLOW_PROVIDER_API_KEY") {
            tracing::debug!("Override provider.api_key from env");
            self.provider.api_key = Some(val);
        }

        if let Some(val) = lookup("LEADFLOW_DETAIL_COST") {
            match val.parse() {
                Ok(cost) => {
                    self.pipeline.detail_cost = cost;
                    tracing::debug!("Override pipeline.detail_cost from env: {}", cost);
                }
                Err(_) => tracing::warn!("Ignoring unparsable LEADFLOW_DETAIL_COST: {}", val),
            }
        }

        if let Some(val) = lookup("LEADFLOW_WORKER_INTERVAL_SECS") {
            match val.parse() {
                Ok(secs) => {
                    self.worker.interval_secs = secs;
                    tracing::debug!("Override worker.interval_secs from env: {}", secs);
                }
                Err(_) => {
                    tracing::warn!("Ignoring unparsable LEADFLOW_WORKER_INTERVAL_SECS: {}", val);
                }
            }
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let lease = self.pipeline.job_lease_secs;
        let ttl = self.pipeline.staging_ttl_minutes;
        let checks: [(&str, bool, &str); 7] = [
            ("pipeline.detail_cost", self.pipeline.detail_cost > 0, "must be positive"),
            ("pipeline.max_quantity", self.pipeline.max_quantity > 0, "must be positive"),
            (
                "pipeline.job_lease_secs",
                (1..=MAX_JOB_LEASE_SECS).contains(&lease),
                "must be between 1 and 86400 (one day)",
            ),
            (
                "pipeline.staging_ttl_minutes",
                (1..=MAX_STAGING_TTL_MINUTES).contains(&ttl),
                "must be between 1 and 10080 (one week)",
            ),
            ("worker.interval_secs", self.worker.interval_secs > 0, "must be positive"),
            ("database.max_connections", self.database.max_connections > 0, "must be positive"),
            ("provider.base_url", !self.provider.base_url.trim().is_empty(), "must not be empty"),
        ];

        for (field, ok, reason) in checks {
            if !ok {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let config_dir = path.parent().ok_or_else(|| ConfigError::InvalidValue {
            field: "config_path".to_string(),
            reason: "no parent directory".to_string(),
        })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/leadflow/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "leadflow", "leadflow").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/leadflow`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "leadflow", "leadflow").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`
    pub path: String,
    /// Maximum pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "leadflow.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Company-data provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// API key sent in the `api-key` header (never written back to disk)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Path of the search endpoint
    pub search_path: String,
    /// Path prefix of the detail endpoint; the tax id is appended
    pub detail_path: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.casadosdados.com.br".to_string(),
            api_key: None,
            search_path: "/v5/cnpj/pesquisa".to_string(),
            detail_path: "/v4/cnpj".to_string(),
            timeout_secs: 30,
            user_agent: "Leadflow/0.1.0".to_string(),
        }
    }
}

/// Longest claim a worker may hold on a job.
pub const MAX_JOB_LEASE_SECS: u64 = 24 * 60 * 60;
/// Longest time a staged lead stays addressable.
pub const MAX_STAGING_TTL_MINUTES: u64 = 7 * 24 * 60;

/// Pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Credits debited on the first consumption of a lead detail
    pub detail_cost: i64,
    /// Lifetime of staged leads in minutes
    pub staging_ttl_minutes: u64,
    /// How long a claimed job belongs to its worker before it can be reclaimed
    pub job_lease_secs: u64,
    /// Upper bound for a job's requested quantity
    pub max_quantity: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detail_cost: 1,
            staging_ttl_minutes: 120,
            job_lease_secs: 300,
            max_quantity: 1000,
        }
    }
}

/// Worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds between ticks when self-scheduling
    pub interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}
