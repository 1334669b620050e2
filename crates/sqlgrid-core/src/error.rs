//! Error types for SQLGRID

use thiserror::Error;

/// Core error type for store operations
#[derive(Error, Debug)]
pub enum SqlgridError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl SqlgridError {
    /// Whether the session behind this error is unusable
    pub fn is_connection_error(&self) -> bool {
        matches!(self, SqlgridError::Connection(_))
    }
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, SqlgridError>;
