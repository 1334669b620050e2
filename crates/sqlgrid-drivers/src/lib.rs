//! SQLGRID Drivers - Database driver implementations
//!
//! This crate provides concrete implementations of the driver traits
//! defined in `sqlgrid-core`, selected by cargo feature.

#[cfg(feature = "mysql")]
pub use sqlgrid_driver_mysql as mysql;
#[cfg(feature = "sqlite")]
pub use sqlgrid_driver_sqlite as sqlite;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from sqlgrid-core
pub use sqlgrid_core::{
    Connection, ConnectionConfig, DatabaseDriver, QueryResult, Result, Row, SchemaIntrospection,
    SqlgridError, StatementResult, Transaction, Value,
};
