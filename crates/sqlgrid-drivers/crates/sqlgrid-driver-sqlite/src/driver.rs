//! SQLite driver implementation

use async_trait::async_trait;
use sqlgrid_core::{Connection, ConnectionConfig, DatabaseDriver, Result, SqlDialect, SqlgridError};
use std::sync::Arc;

use crate::SqliteConnection;

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn display_name(&self) -> &'static str {
        "SQLite"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    #[tracing::instrument(skip(self, config), fields(path = config.get_string("path").or_else(|| config.get_string("database")).as_deref()))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let path = config
            .get_string("path")
            .or_else(|| config.get_string("database"))
            .ok_or_else(|| {
                SqlgridError::Configuration(
                    "SQLite requires a 'path' or 'database' parameter (use :memory: for an in-memory database)".into(),
                )
            })?;

        let conn = SqliteConnection::open(&path).map_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
            SqlgridError::Connection(format!("Failed to connect to SQLite database: {}", e))
        })?;

        tracing::info!(path = %path, "SQLite connection created");
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_to_a_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.db");
        let config = ConnectionConfig::new_sqlite(path.to_str().unwrap());

        let driver = SqliteDriver::new();
        driver.test_connection(&config).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_path_is_a_configuration_error() {
        let err = SqliteDriver::new()
            .connect(&ConnectionConfig::new("sqlite"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SqlgridError::Configuration(_)));
    }

    #[tokio::test]
    async fn missing_parent_directory_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("grid.db");
        let config = ConnectionConfig::new_sqlite(path.to_str().unwrap());
        let err = SqliteDriver::new().connect(&config).await.err().unwrap();
        assert!(err.is_connection_error());
    }
}
