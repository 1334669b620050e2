//! Authoritative re-read of the selected table

use sqlgrid_core::{Connection, Identifier, SqlDialect, SqlgridError};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::grid::{GridModel, GridRow};
use crate::inspector::SchemaInspector;
use crate::schema::{SchemaDrift, TableSchema};
use crate::timeout::bounded;
use crate::{SyncError, SyncResult};

/// What one refresh did to the grid
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// No table selected
    Idle,
    /// Store content matches the grid; the grid was left alone
    Unchanged,
    Refreshed {
        drift: Option<SchemaDrift>,
        row_count: usize,
    },
    /// The selected table is gone; the grid was cleared
    SelectionInvalidated { table: Identifier },
}

pub struct RefreshLoop {
    conn: Arc<dyn Connection>,
    inspector: SchemaInspector,
    dialect: SqlDialect,
    row_limit: Option<usize>,
    statement_timeout: Option<Duration>,
}

impl RefreshLoop {
    pub fn new(conn: Arc<dyn Connection>, config: &SyncConfig) -> Self {
        let statement_timeout = config.statement_timeout();
        Self {
            inspector: SchemaInspector::new(conn.clone())
                .with_statement_timeout(statement_timeout),
            dialect: conn.dialect(),
            conn,
            row_limit: config.row_limit,
            statement_timeout,
        }
    }

    pub fn inspector(&self) -> &SchemaInspector {
        &self.inspector
    }

    /// Read `table` from scratch into `grid`, replacing whatever it held
    #[tracing::instrument(skip_all, fields(table = %table))]
    pub async fn load(&self, table: &Identifier, grid: &mut GridModel) -> SyncResult<usize> {
        let (schema, rows) = self.fetch(table).await?;
        let row_count = rows.len();
        grid.replace(schema, rows)?;
        tracing::debug!(row_count, "table loaded");
        Ok(row_count)
    }

    /// Re-read the grid's table and reconcile.
    ///
    /// The grid is only replaced when schema or rows differ, so refreshing
    /// twice without an intervening change leaves the version untouched.
    pub async fn refresh(&self, grid: &mut GridModel) -> SyncResult<RefreshOutcome> {
        let Some(current) = grid.schema().cloned() else {
            return Ok(RefreshOutcome::Idle);
        };
        let table = current.table.clone();

        let (schema, rows) = match self.fetch(&table).await {
            Ok(fetched) => fetched,
            Err(SyncError::SchemaNotFound(_)) => {
                tracing::info!(table = %table, "selected table disappeared");
                grid.clear();
                return Ok(RefreshOutcome::SelectionInvalidated { table });
            }
            Err(e) => return Err(e),
        };

        let drift = current.drift_to(&schema);
        if drift.is_none() && schema == current && rows == grid.rows() {
            return Ok(RefreshOutcome::Unchanged);
        }
        if let Some(drift) = &drift {
            tracing::info!(table = %table, %drift, "schema drift");
        }

        let row_count = rows.len();
        grid.replace(schema, rows)?;
        Ok(RefreshOutcome::Refreshed { drift, row_count })
    }

    async fn fetch(&self, table: &Identifier) -> SyncResult<(TableSchema, Vec<GridRow>)> {
        let schema = self.inspector.inspect(table).await?;
        let sql = select_rows_sql(self.dialect, &schema, self.row_limit);

        let result = bounded(self.statement_timeout, "row fetch", self.conn.query(&sql, &[]))
            .await
            .map_err(|e| match e {
                SqlgridError::Connection(msg) => SyncError::Connection(msg),
                other => SyncError::introspection(table.as_str(), other),
            })?;

        let width = schema.columns.len();
        let mut rows = Vec::with_capacity(result.rows.len());
        for row in result.rows {
            let values = row.into_values();
            if values.len() != width {
                return Err(SyncError::introspection(
                    table.as_str(),
                    format!("fetched {} cells per row, expected {}", values.len(), width),
                ));
            }
            let values = values
                .into_iter()
                .zip(&schema.columns)
                .map(|(value, column)| column.column_type.normalize(value))
                .collect();
            rows.push(GridRow::from_values(&schema, values));
        }
        Ok((schema, rows))
    }
}

/// Full-table read, ordered by primary key when there is one
fn select_rows_sql(dialect: SqlDialect, schema: &TableSchema, limit: Option<usize>) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| dialect.quote(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("SELECT {} FROM {}", columns, dialect.quote(&schema.table));
    if schema.has_primary_key() {
        let order = schema
            .primary_key
            .iter()
            .map(|k| dialect.quote(k))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ORDER BY {}", order));
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql
}
