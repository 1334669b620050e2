//! Validated SQL identifiers
//!
//! Table and column names cannot be sent as bind parameters, so they are the
//! one piece of user input spliced into statement text. Every such name goes
//! through [`Identifier::parse`] first, which only admits ASCII letters,
//! digits and underscores.

use crate::{Result, SqlgridError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// MySQL's limit; SQLite has none but the lower bound keeps names portable.
pub const MAX_IDENTIFIER_LEN: usize = 64;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("identifier pattern is valid"));

/// A table or column name that passed the allow-list check
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validate `name` against the allow-list pattern
    pub fn parse(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(SqlgridError::InvalidIdentifier(
                "identifier must not be empty".into(),
            ));
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(SqlgridError::InvalidIdentifier(format!(
                "'{}' is longer than {} characters",
                name, MAX_IDENTIFIER_LEN
            )));
        }
        if !IDENTIFIER_PATTERN.is_match(name) {
            return Err(SqlgridError::InvalidIdentifier(format!(
                "'{}' may only contain letters, digits and underscores",
                name
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identifier {
    type Error = SqlgridError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = SqlgridError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["orders", "order_items", "_tmp", "t2", "2024_sales"] {
            assert!(Identifier::parse(name).is_ok(), "{} should be accepted", name);
        }
    }

    #[test]
    fn rejects_injection_attempts() {
        for name in [
            "",
            "orders; DROP TABLE users",
            "status = 'x'",
            "a-b",
            "na\"me",
            "na`me",
            "sp ace",
            "ünïcode",
        ] {
            let err = Identifier::parse(name).unwrap_err();
            assert!(matches!(err, SqlgridError::InvalidIdentifier(_)), "{}", name);
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let name = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(Identifier::parse(&name).is_err());
        assert!(Identifier::parse(&name[..MAX_IDENTIFIER_LEN]).is_ok());
    }

    #[test]
    fn deserializing_validates() {
        let ok: Identifier = serde_json::from_str("\"orders\"").unwrap();
        assert_eq!(ok, "orders");
        assert!(serde_json::from_str::<Identifier>("\"bad name\"").is_err());
    }
}
