//! Connection trait and transaction handling

use crate::{QueryResult, Result, SchemaIntrospection, SqlDialect, StatementResult, Value};
use async_trait::async_trait;

/// A live session to a relational store.
///
/// Implementations serialize statements on a single underlying session; the
/// sync engine relies on that to keep refreshes and mutations from
/// interleaving.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "mysql")
    fn driver_name(&self) -> &str;

    /// Dialect used to render statements for this connection
    fn dialect(&self) -> SqlDialect {
        SqlDialect::from_driver_name(self.driver_name())
    }

    /// Execute a statement that modifies data or schema
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get schema introspection interface if supported
    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        None
    }
}

/// A database transaction
///
/// Dropping a transaction that was neither committed nor rolled back rolls it
/// back.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Execute a query within the transaction
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement within the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;
}
