use sqlgrid_core::SqlgridError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Engine-level errors, each carrying a message fit to show the user
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// The session is unusable; the coordinator stops.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Table '{0}' does not exist")]
    SchemaNotFound(String),

    #[error("Could not inspect table '{table}': {reason}")]
    IntrospectionFailed { table: String, reason: String },

    #[error("Mutation failed: {reason}")]
    MutationFailed { reason: String },

    /// The row or column the grid pointed at no longer matches the store.
    #[error("Stale reference: {0}")]
    StaleReference(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No table selected")]
    NoTableSelected,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn mutation(reason: impl std::fmt::Display) -> Self {
        SyncError::MutationFailed {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn introspection(table: &str, reason: impl std::fmt::Display) -> Self {
        SyncError::IntrospectionFailed {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors after which the session cannot be used any more
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Connection(_))
    }

    /// Errors that leave the grid possibly out of step with the store
    pub fn needs_refresh(&self) -> bool {
        matches!(
            self,
            SyncError::MutationFailed { .. } | SyncError::StaleReference(_)
        )
    }

    /// Short machine-readable name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Connection(_) => "connection",
            SyncError::SchemaNotFound(_) => "schema_not_found",
            SyncError::IntrospectionFailed { .. } => "introspection_failed",
            SyncError::MutationFailed { .. } => "mutation_failed",
            SyncError::StaleReference(_) => "stale_reference",
            SyncError::Validation(_) => "validation",
            SyncError::NoTableSelected => "no_table_selected",
            SyncError::Config(_) => "config",
        }
    }
}

/// Store errors surfacing from a mutation; introspection maps its own.
impl From<SqlgridError> for SyncError {
    fn from(err: SqlgridError) -> Self {
        match err {
            SqlgridError::Connection(msg) => SyncError::Connection(msg),
            SqlgridError::InvalidIdentifier(msg) => SyncError::Validation(msg),
            other => SyncError::mutation(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_by_kind() {
        let err: SyncError = SqlgridError::Connection("gone".into()).into();
        assert!(err.is_fatal());

        let err: SyncError = SqlgridError::Query("UNIQUE constraint failed".into()).into();
        assert!(err.needs_refresh());
        assert_eq!(err.kind(), "mutation_failed");
        assert!(err.to_string().contains("UNIQUE constraint failed"));
    }

    #[test]
    fn validation_is_not_refresh_worthy() {
        assert!(!SyncError::Validation("bad".into()).needs_refresh());
        assert!(!SyncError::NoTableSelected.is_fatal());
    }
}
