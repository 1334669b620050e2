//! MySQL/MariaDB driver implementation

mod connection;
mod driver;
mod schema;

pub use connection::{MySqlConnection, MySqlTransaction};
pub use driver::MySqlDriver;
