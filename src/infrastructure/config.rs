//! Configuration infrastructure
//!
//! Settings come from two places:
//! 1. A layered file + environment source (`AppConfig::from_file`), used by
//!    the headless runner and deployments.
//! 2. A JSON file managed by `ConfigManager` in the user's config directory,
//!    created with defaults on first run.
//!
//! Both end in the same `AppConfig` and both are validated before use.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config from file: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorSettings,
    pub endpoint: EndpointConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Knobs of the bulk run engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Products sent per batched request
    pub product_chunk_size: usize,

    /// Selected runs larger than this need explicit confirmation
    pub confirmation_threshold: usize,

    pub max_selected_stores: usize,
    pub max_selected_products: usize,

    /// Elapsed-time refresh period
    pub tick_interval_ms: u64,

    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,
}

impl OrchestratorSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Cleaning backend location and HTTP behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub products_path: String,
    pub stores_path: String,
    pub run_logs_path: String,
    pub request_timeout_seconds: u64,
    pub user_agent: String,
}

impl EndpointConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Where finished run logs go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLogBackend {
    /// Local SQLite activity timeline
    Sqlite,
    /// POST to the backend's log endpoint
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to the application data directory
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    pub run_log_backend: RunLogBackend,
    /// Timeline entries older than this are pruned at startup; 0 keeps all
    pub retention_days: u32,
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs in the log file
    pub json_format: bool,

    pub console_output: bool,
    pub file_output: bool,

    /// Log directory; defaults to `<app data>/logs`
    pub log_dir: Option<PathBuf>,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            product_chunk_size: defaults::PRODUCT_CHUNK_SIZE,
            confirmation_threshold: defaults::CONFIRMATION_THRESHOLD,
            max_selected_stores: defaults::MAX_SELECTED_STORES,
            max_selected_products: defaults::MAX_SELECTED_PRODUCTS,
            tick_interval_ms: defaults::TICK_INTERVAL_MS,
            event_buffer_size: defaults::EVENT_BUFFER_SIZE,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::ENDPOINT_BASE_URL.to_string(),
            products_path: defaults::PRODUCTS_PATH.to_string(),
            stores_path: defaults::STORES_PATH.to_string(),
            run_logs_path: defaults::RUN_LOGS_PATH.to_string(),
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: defaults::DB_MAX_CONNECTIONS,
            run_log_backend: RunLogBackend::Sqlite,
            retention_days: defaults::RUN_LOG_RETENTION_DAYS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: None,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("tokio".to_string(), "info".to_string());
                filters.insert("catalog_bulk_ops".to_string(), "info".to_string());
                filters
            },
        }
    }
}

impl AppConfig {
    /// Load from a file, overridden by `BULKOPS_*` environment variables
    /// (`BULKOPS_ORCHESTRATOR__PRODUCT_CHUNK_SIZE=5`).
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let orchestrator = &self.orchestrator;
        for (name, value) in [
            ("product_chunk_size", orchestrator.product_chunk_size),
            ("confirmation_threshold", orchestrator.confirmation_threshold),
            ("max_selected_stores", orchestrator.max_selected_stores),
            ("max_selected_products", orchestrator.max_selected_products),
            ("event_buffer_size", orchestrator.event_buffer_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation {
                    message: format!("orchestrator.{} must be greater than 0", name),
                });
            }
        }

        if orchestrator.tick_interval_ms == 0 {
            return Err(ConfigError::Validation {
                message: "orchestrator.tick_interval_ms must be greater than 0".to_string(),
            });
        }

        if self.endpoint.request_timeout_seconds == 0 {
            return Err(ConfigError::Validation {
                message: "endpoint.request_timeout_seconds must be greater than 0".to_string(),
            });
        }

        if url::Url::parse(&self.endpoint.base_url).is_err() {
            return Err(ConfigError::Validation {
                message: format!("endpoint.base_url '{}' is not a valid URL", self.endpoint.base_url),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation {
                message: "database.max_connections must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);
        Ok(config_dir)
    }

    /// Get application data directory
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join(defaults::APP_DIR_NAME);
        Ok(data_dir)
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join(defaults::CONFIG_FILE_NAME);
        Ok(Self { config_path })
    }

    /// Manager over an explicit file, used by tests and `--config-json`
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration, writing defaults on first run.
    ///
    /// A file that no longer parses is copied aside as `*.json.corrupted`
    /// and replaced by defaults.
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("🎉 First run detected - writing default configuration to {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                config
                    .validate()
                    .with_context(|| format!("Invalid configuration in {:?}", self.config_path))?;
                info!("Loaded configuration from: {:?}", self.config_path);
                Ok(config)
            }
            Err(parse_error) => {
                warn!("⚠️ Configuration file could not be parsed: {}", parse_error);

                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    warn!("Failed to create backup of corrupted config: {}", e);
                } else {
                    info!("Backed up corrupted config to: {:?}", backup_path);
                }

                let default_config = AppConfig::default();
                self.save_config(&default_config)
                    .await
                    .context("Failed to save default configuration")?;
                info!("✅ Reset to default configuration");
                Ok(default_config)
            }
        }
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Load, modify and save in one step
    pub async fn update_config<F>(&self, updater: F) -> Result<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = self.load_config().await?;
        updater(&mut config);
        config.validate()?;
        self.save_config(&config).await?;
        Ok(config)
    }
}

/// Default configuration values
pub mod defaults {
    pub const APP_DIR_NAME: &str = "catalog-bulk-ops";
    pub const CONFIG_FILE_NAME: &str = "catalog_bulk_ops_config.json";
    pub const DATABASE_FILE_NAME: &str = "activity.db";
    pub const ENV_PREFIX: &str = "BULKOPS";

    /// Products per batched clean-up request
    pub const PRODUCT_CHUNK_SIZE: usize = 3;

    /// Selected runs above this size go through the confirm phase
    pub const CONFIRMATION_THRESHOLD: usize = 10;

    /// Manual selection caps. Both sit at or below the threshold, so with the
    /// defaults a hand-picked selection never reaches the confirm phase; raise
    /// `max_selected_products` above `confirmation_threshold` to use it.
    pub const MAX_SELECTED_STORES: usize = 5;
    pub const MAX_SELECTED_PRODUCTS: usize = 10;
    pub const TICK_INTERVAL_MS: u64 = 1000;
    pub const EVENT_BUFFER_SIZE: usize = 256;

    pub const ENDPOINT_BASE_URL: &str = "http://localhost:3000";
    pub const PRODUCTS_PATH: &str = "/api/admin/clean-products";
    pub const STORES_PATH: &str = "/api/admin/clean-store";
    pub const RUN_LOGS_PATH: &str = "/api/admin/activity-log";

    /// Store clean-ups regenerate descriptions and can take a while
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 120;
    pub const USER_AGENT: &str = concat!("catalog-bulk-ops/", env!("CARGO_PKG_VERSION"));

    pub const DB_MAX_CONNECTIONS: u32 = 5;
    pub const RUN_LOG_RETENTION_DAYS: u32 = 90;
    pub const RECENT_RUN_LOGS_LIMIT: u32 = 20;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = true;
    pub const LOG_MAX_FILES: u32 = 5;
    pub const LOG_AUTO_CLEANUP: bool = true;
}
