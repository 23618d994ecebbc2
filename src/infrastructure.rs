//! Infrastructure layer for configuration, logging, storage and the cleaning backend
//!
//! Everything here implements a domain seam (`ProductCleaningService`,
//! `StoreCleaningService`, `RunLogSink`/`RunLogRepository`) or sets up the
//! process (config, logging).

pub mod cleaning_client;
pub mod config;
pub mod database_connection;
pub mod logging;
pub mod run_log_repository;

// Re-export commonly used items
pub use cleaning_client::HttpCleaningClient;
pub use config::{
    AppConfig, ConfigError, ConfigManager, DatabaseConfig, EndpointConfig, LoggingConfig,
    OrchestratorSettings, RunLogBackend,
};
pub use database_connection::DatabaseConnection;
pub use logging::{get_log_directory, init_logging, init_logging_with_config, log_system_info};
pub use run_log_repository::SqliteRunLogRepository;
