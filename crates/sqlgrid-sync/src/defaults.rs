//! Default values for `ADD COLUMN` when the intent supplies none

use serde::{Deserialize, Serialize};
use sqlgrid_core::Value;

use crate::schema::{ColumnType, ColumnTypeKind};
use crate::{SyncError, SyncResult};

/// A literal as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultLiteral {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl From<&DefaultLiteral> for Value {
    fn from(literal: &DefaultLiteral) -> Self {
        match literal {
            DefaultLiteral::Integer(i) => Value::Int64(*i),
            DefaultLiteral::Float(f) => Value::Float64(*f),
            DefaultLiteral::Bool(b) => Value::Bool(*b),
            DefaultLiteral::Text(s) => Value::String(s.clone()),
        }
    }
}

/// One policy entry; an entry without `value` means `DEFAULT NULL`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DefaultSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<DefaultLiteral>,
}

impl DefaultSpec {
    pub fn null() -> Self {
        Self { value: None }
    }

    pub fn literal(value: DefaultLiteral) -> Self {
        Self { value: Some(value) }
    }

    pub fn to_value(&self) -> Value {
        self.value.as_ref().map(Value::from).unwrap_or(Value::Null)
    }
}

/// Per-type defaults, read from the `[defaults]` config table.
///
/// ```toml
/// [defaults.integer]
/// value = 0
///
/// [defaults.text]      # no value: DEFAULT NULL
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultPolicy {
    pub integer: Option<DefaultSpec>,
    pub text: Option<DefaultSpec>,
    pub date: Option<DefaultSpec>,
    pub datetime: Option<DefaultSpec>,
    pub other: Option<DefaultSpec>,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            integer: Some(DefaultSpec::literal(DefaultLiteral::Integer(0))),
            text: Some(DefaultSpec::null()),
            date: Some(DefaultSpec::null()),
            datetime: Some(DefaultSpec::null()),
            other: None,
        }
    }
}

impl DefaultPolicy {
    pub fn entry(&self, kind: ColumnTypeKind) -> Option<&DefaultSpec> {
        match kind {
            ColumnTypeKind::Integer => self.integer.as_ref(),
            ColumnTypeKind::Text => self.text.as_ref(),
            ColumnTypeKind::Date => self.date.as_ref(),
            ColumnTypeKind::DateTime => self.datetime.as_ref(),
            ColumnTypeKind::Other => self.other.as_ref(),
        }
    }

    pub fn set(&mut self, kind: ColumnTypeKind, spec: Option<DefaultSpec>) {
        let slot = match kind {
            ColumnTypeKind::Integer => &mut self.integer,
            ColumnTypeKind::Text => &mut self.text,
            ColumnTypeKind::Date => &mut self.date,
            ColumnTypeKind::DateTime => &mut self.datetime,
            ColumnTypeKind::Other => &mut self.other,
        };
        *slot = spec;
    }

    /// Default for a new column of `column_type`, coerced to that type
    pub fn default_for(&self, column_type: &ColumnType) -> SyncResult<Value> {
        let spec = self.entry(column_type.kind()).ok_or_else(|| {
            SyncError::Validation(format!(
                "no default configured for {} columns; supply one explicitly",
                column_type
            ))
        })?;
        column_type.coerce(spec.to_value())
    }
}
