//! Database driver trait definition

use crate::{Connection, Result, SqlDialect};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A database driver capable of opening sessions
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Driver identifier (e.g., "sqlite", "mysql")
    fn name(&self) -> &'static str;

    /// Human-readable driver name
    fn display_name(&self) -> &'static str;

    /// Default connection port (None for file-based databases like SQLite)
    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Dialect spoken by connections from this driver
    fn dialect(&self) -> SqlDialect {
        SqlDialect::from_driver_name(self.name())
    }

    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// Open a connection, run a trivial query and close it again
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        tracing::debug!(driver = self.name(), "testing connection");
        let conn = self.connect(config).await?;
        conn.query("SELECT 1", &[]).await?;
        conn.close().await
    }
}

/// Connection configuration
///
/// Host, user, password and database as a connect dialog collects them, plus
/// a driver name and port.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver ID (e.g., "mysql", "sqlite")
    pub driver: String,
    /// Host address (empty for file-based databases)
    #[serde(default)]
    pub host: String,
    /// Port number (0 for the driver default)
    #[serde(default)]
    pub port: u16,
    /// Database name or file path
    #[serde(default)]
    pub database: Option<String>,
    /// Username
    #[serde(default)]
    pub username: Option<String>,
    /// Password
    #[serde(default)]
    pub password: Option<String>,
    /// Additional connection parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ConnectionConfig {
    /// Create a new configuration with default values
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            host: String::new(),
            port: 0,
            database: None,
            username: None,
            password: None,
            params: HashMap::new(),
        }
    }

    /// Create a SQLite configuration
    pub fn new_sqlite(database_path: &str) -> Self {
        let mut config = Self::new("sqlite");
        config.database = Some(database_path.to_string());
        config
    }

    /// Create a MySQL configuration
    pub fn new_mysql(host: &str, port: u16, database: &str, username: &str) -> Self {
        let mut config = Self::new("mysql");
        config.host = host.to_string();
        config.port = port;
        config.database = Some(database.to_string());
        config.username = Some(username.to_string());
        config
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Get a string parameter
    pub fn get_string(&self, key: &str) -> Option<String> {
        if let Some(val) = self.params.get(key) {
            return Some(val.clone());
        }
        match key {
            "host" if !self.host.is_empty() => Some(self.host.clone()),
            "database" | "path" => self.database.clone(),
            "username" | "user" => self.username.clone(),
            "password" => self.password.clone(),
            _ => None,
        }
    }

    /// Port, falling back to `default` when unset
    pub fn port_or(&self, default: u16) -> u16 {
        if self.port == 0 { default } else { self.port }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("params", &self.params)
            .finish()
    }
}
