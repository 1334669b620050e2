//! SQLGRID Core - Core abstractions and traits for the table sync engine
//!
//! This crate provides the fundamental traits and types that all other
//! SQLGRID crates depend on. It defines:
//!
//! - `DatabaseDriver` - Trait for database driver implementations
//! - `Connection` / `Transaction` - Traits for a live store session
//! - `SchemaIntrospection` - Trait for schema inspection
//! - `Identifier` - Allow-listed table/column names safe to splice into SQL
//! - `SqlDialect` - Quoting and DDL differences between stores
//! - Common types like `Value`, `Row`, `QueryResult`

mod connection;
mod dialect;
mod driver;
mod error;
mod identifier;
mod schema;
mod types;

pub use connection::*;
pub use dialect::*;
pub use driver::*;
pub use error::*;
pub use identifier::*;
pub use schema::*;
pub use types::*;
