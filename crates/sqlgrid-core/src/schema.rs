//! Schema introspection traits and types

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Schema introspection interface
///
/// Table names passed in are expected to be validated identifiers; drivers
/// still bind them as parameters wherever the store allows it.
#[async_trait]
pub trait SchemaIntrospection: Send + Sync {
    /// List all base tables in the current database
    async fn list_tables(&self) -> Result<Vec<TableInfo>>;

    /// Whether a base table with this exact name exists
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Get columns for a table, in declaration order
    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Get primary key for a table
    async fn get_primary_key(&self, table: &str) -> Result<Option<PrimaryKeyInfo>> {
        let columns = self.get_columns(table).await?;
        let pk_columns: Vec<String> = columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect();

        if pk_columns.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PrimaryKeyInfo {
                name: None,
                columns: pk_columns,
            }))
        }
    }
}

/// Table information (basic)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub row_count: Option<i64>,
}

/// Column information as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColumnInfo {
    pub name: String,
    pub ordinal: usize,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
}

/// Primary key information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyInfo {
    pub name: Option<String>,
    /// Key columns in key order
    pub columns: Vec<String>,
}
