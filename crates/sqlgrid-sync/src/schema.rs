//! Table schema as the engine sees it

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlgrid_core::{Identifier, Value};

use crate::{SyncError, SyncResult};

/// Type names accepted in `ADD COLUMN`: a word, optional further words, an
/// optional `(n)` or `(p, s)` size suffix.
static DDL_TYPE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(?: [A-Za-z][A-Za-z0-9_]*)*(?:\(\s*\d{1,5}\s*(?:,\s*\d{1,3}\s*)?\))?(?: [A-Za-z]+)*$")
        .expect("DDL type pattern is valid")
});

const MAX_DDL_TYPE_LEN: usize = 64;

/// Coarse type family, used to key the default-value policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnTypeKind {
    Integer,
    Text,
    Date,
    DateTime,
    Other,
}

/// Declared column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text { max_len: Option<u32> },
    Date,
    DateTime,
    /// Anything else, kept verbatim as the store reported it
    Other(String),
}

impl ColumnType {
    /// Classify a store-reported type string (`int(11)`, `VARCHAR(255)`, `TEXT`, ...)
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_lowercase();
        let (base, args) = match lower.split_once('(') {
            Some((base, rest)) => (base.trim(), rest.split(')').next()),
            None => (lower.split_whitespace().next().unwrap_or(""), None),
        };
        let base = base.trim_end_matches(" unsigned");

        match base {
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" => {
                ColumnType::Integer
            }
            "varchar" | "char" | "text" | "tinytext" | "mediumtext" | "longtext" | "nvarchar"
            | "nchar" | "character varying" | "character" | "clob" => ColumnType::Text {
                max_len: args.and_then(|a| a.trim().parse().ok()),
            },
            "date" => ColumnType::Date,
            "datetime" | "timestamp" => ColumnType::DateTime,
            _ => ColumnType::Other(trimmed.to_string()),
        }
    }

    /// Validate a user-supplied type name before it is spliced into DDL
    pub fn parse_ddl(raw: &str) -> SyncResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_DDL_TYPE_LEN {
            return Err(SyncError::Validation(format!(
                "column type must be 1-{} characters",
                MAX_DDL_TYPE_LEN
            )));
        }
        if !DDL_TYPE_PATTERN.is_match(trimmed) {
            return Err(SyncError::Validation(format!(
                "'{}' is not a valid column type",
                trimmed
            )));
        }
        Ok(Self::parse(trimmed))
    }

    pub fn kind(&self) -> ColumnTypeKind {
        match self {
            ColumnType::Integer => ColumnTypeKind::Integer,
            ColumnType::Text { .. } => ColumnTypeKind::Text,
            ColumnType::Date => ColumnTypeKind::Date,
            ColumnType::DateTime => ColumnTypeKind::DateTime,
            ColumnType::Other(_) => ColumnTypeKind::Other,
        }
    }

    /// Whether two declarations name the same type.
    ///
    /// Integer display widths (`int` vs `int(11)`) and letter case do not count.
    pub fn same_as(&self, other: &ColumnType) -> bool {
        match (self, other) {
            (ColumnType::Other(a), ColumnType::Other(b)) => {
                let squash = |s: &str| {
                    s.chars()
                        .filter(|c| !c.is_whitespace())
                        .collect::<String>()
                        .to_lowercase()
                };
                squash(a) == squash(b)
            }
            _ => self == other,
        }
    }

    /// DDL spelling of the type
    pub fn to_sql(&self) -> String {
        match self {
            ColumnType::Integer => "INT".to_string(),
            ColumnType::Text { max_len: Some(n) } => format!("VARCHAR({})", n),
            ColumnType::Text { max_len: None } => "TEXT".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Other(raw) => raw.clone(),
        }
    }

    /// Convert an incoming value to what this column stores.
    ///
    /// `NULL` always passes; nullability is the store's to enforce.
    pub fn coerce(&self, value: Value) -> SyncResult<Value> {
        if value.is_null() {
            return Ok(value);
        }
        let reject = |value: &Value| {
            SyncError::Validation(format!(
                "{} value '{}' does not fit a {} column",
                value.kind(),
                value,
                self.to_sql()
            ))
        };

        match self {
            ColumnType::Integer => match value {
                Value::Int64(_) => Ok(value),
                Value::Bool(b) => Ok(Value::Int64(i64::from(b))),
                Value::Float64(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                    Ok(Value::Int64(f as i64))
                }
                Value::String(ref s) | Value::Decimal(ref s) => {
                    s.trim().parse::<i64>().map(Value::Int64).map_err(|_| reject(&value))
                }
                _ => Err(reject(&value)),
            },
            ColumnType::Text { max_len } => {
                let text = match value {
                    Value::String(s) => s,
                    Value::Bytes(ref b) => String::from_utf8(b.clone()).map_err(|_| reject(&value))?,
                    other => other.to_string(),
                };
                if let Some(max) = max_len {
                    let len = text.chars().count();
                    if len > *max as usize {
                        return Err(SyncError::Validation(format!(
                            "text of {} characters exceeds the column limit of {}",
                            len, max
                        )));
                    }
                }
                Ok(Value::String(text))
            }
            ColumnType::Date => match value {
                Value::Date(_) => Ok(value),
                Value::String(ref s) => parse_date(s).map(Value::Date).ok_or_else(|| reject(&value)),
                _ => Err(reject(&value)),
            },
            ColumnType::DateTime => match value {
                Value::DateTime(_) => Ok(value),
                Value::Date(d) => Ok(d
                    .and_hms_opt(0, 0, 0)
                    .map(Value::DateTime)
                    .unwrap_or(Value::Date(d))),
                Value::String(ref s) => parse_datetime(s)
                    .map(Value::DateTime)
                    .ok_or_else(|| reject(&value)),
                _ => Err(reject(&value)),
            },
            ColumnType::Other(_) => Ok(value),
        }
    }

    /// Give values read back from the store their typed form.
    ///
    /// SQLite hands dates back as text; this never fails and leaves anything
    /// unparseable untouched.
    pub fn normalize(&self, value: Value) -> Value {
        match (self, value) {
            (ColumnType::Date, Value::String(s)) => match parse_date(&s) {
                Some(d) => Value::Date(d),
                None => Value::String(s),
            },
            (ColumnType::DateTime, Value::String(s)) => match parse_datetime(&s) {
                Some(dt) => Value::DateTime(dt),
                None => Value::String(s),
            },
            (_, value) => value,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_sql())
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// One column of a table
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: Identifier,
    pub column_type: ColumnType,
    /// Type string exactly as the store reported it
    pub raw_type: String,
    /// Store-side default expression, if any
    pub default_value: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
}

impl Column {
    /// Whether an INSERT may leave this column out
    pub fn can_omit_on_insert(&self) -> bool {
        self.default_value.is_some() || self.auto_increment || self.nullable
    }
}

/// A table's columns in declaration order plus its primary key
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub table: Identifier,
    pub columns: Vec<Column>,
    /// Primary key columns in key order; empty for keyless tables
    pub primary_key: Vec<Identifier>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    /// Positions of the key columns, in key order
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|k| self.column_index(k.as_str()))
            .collect()
    }

    /// Compare against a newer schema of the same table
    pub fn drift_to(&self, newer: &TableSchema) -> Option<SchemaDrift> {
        let added: Vec<String> = newer
            .columns
            .iter()
            .filter(|c| self.column(c.name.as_str()).is_none())
            .map(|c| c.name.to_string())
            .collect();
        let removed: Vec<String> = self
            .columns
            .iter()
            .filter(|c| newer.column(c.name.as_str()).is_none())
            .map(|c| c.name.to_string())
            .collect();
        let retyped: Vec<String> = self
            .columns
            .iter()
            .filter_map(|old| {
                let new = newer.column(old.name.as_str())?;
                (!new.column_type.same_as(&old.column_type)).then(|| old.name.to_string())
            })
            .collect();

        let kept_old: Vec<&str> = self
            .column_names()
            .into_iter()
            .filter(|n| newer.column(n).is_some())
            .collect();
        let kept_new: Vec<&str> = newer
            .column_names()
            .into_iter()
            .filter(|n| self.column(n).is_some())
            .collect();
        let reordered = kept_old != kept_new;
        let key_changed = self.primary_key != newer.primary_key;

        let drift = SchemaDrift {
            added,
            removed,
            retyped,
            reordered,
            key_changed,
        };
        (!drift.is_empty()).then_some(drift)
    }
}

/// Differences between two schemas of one table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaDrift {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub retyped: Vec<String>,
    pub reordered: bool,
    pub key_changed: bool,
}

impl SchemaDrift {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.retyped.is_empty()
            && !self.reordered
            && !self.key_changed
    }
}

impl std::fmt::Display for SchemaDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("added {}", self.added.join(", ")));
        }
        if !self.removed.is_empty() {
            parts.push(format!("removed {}", self.removed.join(", ")));
        }
        if !self.retyped.is_empty() {
            parts.push(format!("retyped {}", self.retyped.join(", ")));
        }
        if self.reordered {
            parts.push("reordered columns".to_string());
        }
        if self.key_changed {
            parts.push("changed primary key".to_string());
        }
        f.write_str(&parts.join("; "))
    }
}
