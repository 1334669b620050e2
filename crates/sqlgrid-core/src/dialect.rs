//! SQL dialect differences the engine has to care about
//!
//! Statement text is generated once by the sync engine and handed to whatever
//! driver owns the session, so the few places where SQLite and MySQL disagree
//! (identifier quoting, auto-increment syntax, literal escaping in DDL) live
//! here instead of in each driver.

use crate::{Identifier, Result, SqlgridError, Value};
use serde::{Deserialize, Serialize};

/// The dialect of the store behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Sqlite,
    MySql,
    /// ANSI quoting, used by test doubles and unknown drivers
    Generic,
}

impl SqlDialect {
    /// Resolve a dialect from a driver name ("sqlite", "mysql", ...)
    pub fn from_driver_name(driver: &str) -> Self {
        match driver {
            "sqlite" => SqlDialect::Sqlite,
            "mysql" | "mariadb" => SqlDialect::MySql,
            _ => SqlDialect::Generic,
        }
    }

    /// Quote an already validated identifier
    pub fn quote(&self, ident: &Identifier) -> String {
        match self {
            SqlDialect::MySql => format!("`{}`", ident),
            SqlDialect::Sqlite | SqlDialect::Generic => format!("\"{}\"", ident),
        }
    }

    /// Bind parameter placeholder
    pub fn placeholder(&self) -> &'static str {
        "?"
    }

    /// Column definition for the surrogate key of a freshly created table
    pub fn auto_increment_primary_key(&self, column: &Identifier) -> String {
        match self {
            SqlDialect::MySql => format!("{} INT AUTO_INCREMENT PRIMARY KEY", self.quote(column)),
            SqlDialect::Sqlite => {
                format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote(column))
            }
            SqlDialect::Generic => format!("{} INTEGER PRIMARY KEY", self.quote(column)),
        }
    }

    /// `INSERT` for a row whose every column takes its store-side default
    pub fn insert_default_values(&self, table: &Identifier) -> String {
        match self {
            SqlDialect::MySql => format!("INSERT INTO {} () VALUES ()", self.quote(table)),
            SqlDialect::Sqlite | SqlDialect::Generic => {
                format!("INSERT INTO {} DEFAULT VALUES", self.quote(table))
            }
        }
    }

    /// Whether DDL participates in the surrounding transaction.
    ///
    /// MySQL commits implicitly before and after every DDL statement, so a
    /// rollback after a failed `ALTER TABLE` cannot undo anything.
    pub fn transactional_ddl(&self) -> bool {
        !matches!(self, SqlDialect::MySql)
    }

    /// Render a value as a SQL literal.
    ///
    /// Only used for `DEFAULT` clauses in DDL, which no supported store accepts
    /// as a bind parameter. Data statements always bind their values.
    pub fn render_literal(&self, value: &Value) -> Result<String> {
        let literal = match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int64(i) => i.to_string(),
            Value::Float64(f) => {
                if !f.is_finite() {
                    return Err(SqlgridError::NotSupported(format!(
                        "non-finite number {} cannot be used as a literal",
                        f
                    )));
                }
                f.to_string()
            }
            Value::Decimal(d) => {
                if !d.parse::<f64>().is_ok_and(f64::is_finite) {
                    return Err(SqlgridError::NotSupported(format!(
                        "'{}' is not a decimal number",
                        d
                    )));
                }
                d.clone()
            }
            Value::String(s) => self.quote_string(s),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|b| format!("{:02x}", b)).collect();
                format!("X'{}'", hex)
            }
            Value::Date(_) | Value::Time(_) | Value::DateTime(_) => {
                self.quote_string(&value.to_string())
            }
        };
        Ok(literal)
    }

    fn quote_string(&self, s: &str) -> String {
        let escaped = match self {
            // MySQL treats backslash as an escape character inside string
            // literals unless NO_BACKSLASH_ESCAPES is set.
            SqlDialect::MySql => s.replace('\\', "\\\\").replace('\'', "''"),
            SqlDialect::Sqlite | SqlDialect::Generic => s.replace('\'', "''"),
        };
        format!("'{}'", escaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Identifier {
        Identifier::parse(name).unwrap()
    }

    #[test]
    fn quoting_follows_dialect() {
        assert_eq!(SqlDialect::MySql.quote(&ident("orders")), "`orders`");
        assert_eq!(SqlDialect::Sqlite.quote(&ident("orders")), "\"orders\"");
    }

    #[test]
    fn driver_names_map_to_dialects() {
        assert_eq!(SqlDialect::from_driver_name("sqlite"), SqlDialect::Sqlite);
        assert_eq!(SqlDialect::from_driver_name("mysql"), SqlDialect::MySql);
        assert_eq!(SqlDialect::from_driver_name("mock"), SqlDialect::Generic);
    }

    #[test]
    fn string_literals_escape_quotes() {
        let value = Value::String("O'Brien".into());
        assert_eq!(
            SqlDialect::Sqlite.render_literal(&value).unwrap(),
            "'O''Brien'"
        );
        let value = Value::String(r"C:\temp's".into());
        assert_eq!(
            SqlDialect::MySql.render_literal(&value).unwrap(),
            r"'C:\\temp''s'"
        );
    }

    #[test]
    fn numeric_literals_are_bare() {
        assert_eq!(SqlDialect::MySql.render_literal(&Value::Int64(0)).unwrap(), "0");
        assert_eq!(SqlDialect::MySql.render_literal(&Value::Null).unwrap(), "NULL");
        assert!(SqlDialect::MySql
            .render_literal(&Value::Float64(f64::NAN))
            .is_err());
        assert!(SqlDialect::MySql
            .render_literal(&Value::Decimal("1; DROP".into()))
            .is_err());
    }

    #[test]
    fn default_values_insert_per_dialect() {
        assert_eq!(
            SqlDialect::MySql.insert_default_values(&ident("orders")),
            "INSERT INTO `orders` () VALUES ()"
        );
        assert_eq!(
            SqlDialect::Sqlite.insert_default_values(&ident("orders")),
            "INSERT INTO \"orders\" DEFAULT VALUES"
        );
    }

    #[test]
    fn auto_increment_syntax() {
        assert_eq!(
            SqlDialect::MySql.auto_increment_primary_key(&ident("id")),
            "`id` INT AUTO_INCREMENT PRIMARY KEY"
        );
        assert_eq!(
            SqlDialect::Sqlite.auto_increment_primary_key(&ident("id")),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
    }
}
