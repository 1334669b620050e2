//! Engine configuration, read from an optional TOML file

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::defaults::DefaultPolicy;
use crate::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the refresh loop
    pub refresh_interval_ms: u64,
    /// Upper bound for a single store round trip; unbounded when unset
    pub statement_timeout_ms: Option<u64>,
    /// How long an open cell editor may hold back periodic refreshes
    pub edit_hold_timeout_ms: u64,
    /// Cap on rows fetched per refresh
    pub row_limit: Option<usize>,
    pub defaults: DefaultPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1000,
            statement_timeout_ms: None,
            edit_hold_timeout_ms: 30_000,
            row_limit: None,
            defaults: DefaultPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.refresh_interval_ms == 0 {
            return Err(SyncError::Config(
                "refresh_interval_ms must be greater than zero".into(),
            ));
        }
        if self.statement_timeout_ms == Some(0) {
            return Err(SyncError::Config(
                "statement_timeout_ms must be greater than zero when set".into(),
            ));
        }
        if self.row_limit == Some(0) {
            return Err(SyncError::Config("row_limit must be greater than zero when set".into()));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }

    pub fn edit_hold_timeout(&self) -> Duration {
        Duration::from_millis(self.edit_hold_timeout_ms)
    }
}
