// Database connection and pool management
// SQLite activity timeline store, accessed through sqlx

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::infrastructure::config::{defaults, ConfigManager, DatabaseConfig};

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let in_memory = db_path.starts_with(":memory:");

        if !in_memory {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            // sqlx will not create a missing file without `mode=rwc`
            if !Path::new(db_path).exists() {
                tokio::fs::File::create(db_path)
                    .await
                    .with_context(|| format!("Failed to create database file {}", db_path))?;
            }
        }

        // Every in-memory connection is its own database; keep exactly one
        let max_connections = if in_memory { 1 } else { max_connections.max(1) };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to {}", database_url))?;

        Ok(Self { pool })
    }

    /// Connect using the configured path, or `<app data>/database/activity.db`
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let path = match &config.path {
            Some(path) => path.clone(),
            None => default_database_path()?,
        };
        info!("🗄️ Opening activity database at {:?}", path);
        Self::new(&format!("sqlite:{}", path.display()), config.max_connections).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_run_logs_sql = r#"
            CREATE TABLE IF NOT EXISTS run_logs (
                id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                items_processed INTEGER NOT NULL,
                items_updated INTEGER NOT NULL,
                items_skipped INTEGER NOT NULL,
                message TEXT NOT NULL,
                details TEXT NOT NULL,
                elapsed_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_run_logs_created_at ON run_logs (created_at);
            CREATE INDEX IF NOT EXISTS idx_run_logs_scope ON run_logs (scope);
        "#;

        sqlx::query(create_run_logs_sql).execute(&self.pool).await?;
        sqlx::query(create_indexes_sql).execute(&self.pool).await?;

        Ok(())
    }
}

fn default_database_path() -> Result<PathBuf> {
    Ok(ConfigManager::get_app_data_dir()?
        .join("database")
        .join(defaults::DATABASE_FILE_NAME))
}
