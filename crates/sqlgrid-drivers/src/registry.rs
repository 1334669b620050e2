//! Driver registry for managing available database drivers

use sqlgrid_core::{Connection, ConnectionConfig, DatabaseDriver, Result, SqlgridError};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available database drivers
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::new()));
        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::mysql::MySqlDriver::new()));

        registry
    }

    /// Register a new driver
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let name = driver.name().to_string();
        tracing::info!(driver = %name, "registering database driver");
        self.drivers.insert(name, driver);
    }

    /// Get a driver by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(&name.to_lowercase()).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %name, "driver not found in registry");
        }
        driver
    }

    /// List all registered driver names, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Check if a driver is registered
    pub fn has(&self, name: &str) -> bool {
        self.drivers.contains_key(&name.to_lowercase())
    }

    /// Open a connection with the driver named in `config`
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let driver = self.get(&config.driver).ok_or_else(|| {
            SqlgridError::Configuration(format!(
                "Unknown driver '{}' (available: {})",
                config.driver,
                self.list().join(", ")
            ))
        })?;
        driver.connect(config).await
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_enabled_features() {
        let registry = DriverRegistry::with_defaults();
        assert_eq!(registry.has("sqlite"), cfg!(feature = "sqlite"));
        assert_eq!(registry.has("MySQL"), cfg!(feature = "mysql"));
        assert!(!registry.has("postgres"));
    }

    #[tokio::test]
    async fn unknown_driver_is_a_configuration_error() {
        let registry = DriverRegistry::new();
        let err = registry
            .connect(&ConnectionConfig::new("oracle"))
            .await
            .err()
            .expect("no drivers registered");
        assert!(matches!(err, SqlgridError::Configuration(_)));
    }
}
