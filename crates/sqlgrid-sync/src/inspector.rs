//! Reads a table's shape from the store

use sqlgrid_core::{
    ColumnInfo, Connection, Identifier, SchemaIntrospection, SqlgridError, TableInfo,
};
use std::sync::Arc;
use std::time::Duration;

use crate::schema::{Column, ColumnType, TableSchema};
use crate::timeout::bounded;
use crate::{SyncError, SyncResult};

pub struct SchemaInspector {
    conn: Arc<dyn Connection>,
    statement_timeout: Option<Duration>,
}

impl SchemaInspector {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn,
            statement_timeout: None,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Columns in declaration order plus the primary key of `table`
    #[tracing::instrument(skip_all, fields(table = %table))]
    pub async fn inspect(&self, table: &Identifier) -> SyncResult<TableSchema> {
        let name = table.as_str();
        let introspection = self.introspection(name)?;

        let exists = bounded(
            self.statement_timeout,
            "table lookup",
            introspection.table_exists(name),
        )
        .await
        .map_err(|e| store_error(name, e))?;
        if !exists {
            return Err(SyncError::SchemaNotFound(name.to_string()));
        }

        let mut infos = bounded(
            self.statement_timeout,
            "column lookup",
            introspection.get_columns(name),
        )
        .await
        .map_err(|e| store_error(name, e))?;
        // Dropped between the two lookups
        if infos.is_empty() {
            return Err(SyncError::SchemaNotFound(name.to_string()));
        }
        infos.sort_by_key(|c| c.ordinal);

        let primary_key = bounded(
            self.statement_timeout,
            "primary key lookup",
            introspection.get_primary_key(name),
        )
        .await
        .map_err(|e| store_error(name, e))?
        .map(|pk| pk.columns)
        .unwrap_or_default()
        .into_iter()
        .map(|column| {
            Identifier::parse(&column).map_err(|e| SyncError::introspection(name, e))
        })
        .collect::<SyncResult<Vec<_>>>()?;

        let columns = infos
            .into_iter()
            .map(|info| to_column(name, info, &primary_key))
            .collect::<SyncResult<Vec<_>>>()?;

        tracing::debug!(
            column_count = columns.len(),
            key_columns = primary_key.len(),
            "table inspected"
        );
        Ok(TableSchema {
            table: table.clone(),
            columns,
            primary_key,
        })
    }

    /// Base tables of the current database, by name
    #[tracing::instrument(skip(self))]
    pub async fn list_tables(&self) -> SyncResult<Vec<TableInfo>> {
        let introspection = self.introspection("*")?;
        let mut tables = bounded(
            self.statement_timeout,
            "table listing",
            introspection.list_tables(),
        )
        .await
        .map_err(|e| store_error("*", e))?;
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    fn introspection(&self, table: &str) -> SyncResult<&dyn SchemaIntrospection> {
        self.conn.as_schema_introspection().ok_or_else(|| {
            SyncError::introspection(
                table,
                format!(
                    "driver '{}' does not support schema introspection",
                    self.conn.driver_name()
                ),
            )
        })
    }
}

fn to_column(table: &str, info: ColumnInfo, primary_key: &[Identifier]) -> SyncResult<Column> {
    let name = Identifier::parse(&info.name).map_err(|e| SyncError::introspection(table, e))?;
    let primary = primary_key.contains(&name);
    Ok(Column {
        column_type: ColumnType::parse(&info.data_type),
        raw_type: info.data_type,
        default_value: info.default_value,
        nullable: info.nullable && !primary,
        primary_key: primary,
        auto_increment: info.is_auto_increment,
        name,
    })
}

fn store_error(table: &str, err: SqlgridError) -> SyncError {
    match err {
        SqlgridError::Connection(msg) => SyncError::Connection(msg),
        other => SyncError::introspection(table, other),
    }
}
