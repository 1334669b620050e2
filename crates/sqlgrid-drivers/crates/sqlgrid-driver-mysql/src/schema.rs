//! MySQL schema introspection implementation

use async_trait::async_trait;
use sqlgrid_core::{
    ColumnInfo, Connection, PrimaryKeyInfo, Result, SchemaIntrospection, TableInfo, Value,
};

use crate::MySqlConnection;

impl MySqlConnection {
    /// Bound as `COALESCE(?, DATABASE())` so an unset database falls back
    /// to whatever the session selected.
    fn schema_param(&self) -> Value {
        self.default_database()
            .map(|db| Value::String(db.to_string()))
            .unwrap_or(Value::Null)
    }
}

#[async_trait]
impl SchemaIntrospection for MySqlConnection {
    #[tracing::instrument(skip(self))]
    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let result = self
            .query(
                "SELECT TABLE_NAME, TABLE_ROWS
                 FROM information_schema.TABLES
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_TYPE = 'BASE TABLE'
                 ORDER BY TABLE_NAME",
                &[self.schema_param()],
            )
            .await?;

        let tables: Vec<TableInfo> = result
            .rows
            .iter()
            .filter_map(|row| {
                let name = row.get(0).and_then(|v| v.as_str())?.to_string();
                // TABLE_ROWS is an InnoDB estimate.
                let row_count = row.get(1).and_then(|v| v.as_i64());
                Some(TableInfo { name, row_count })
            })
            .collect();

        tracing::debug!(table_count = tables.len(), "tables listed");
        Ok(tables)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let result = self
            .query(
                "SELECT COUNT(*)
                 FROM information_schema.TABLES
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? AND TABLE_TYPE = 'BASE TABLE'",
                &[self.schema_param(), Value::String(table.to_string())],
            )
            .await?;
        Ok(result.scalar().and_then(|v| v.as_i64()).unwrap_or(0) > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let result = self
            .query(
                "SELECT
                    COLUMN_NAME,
                    ORDINAL_POSITION,
                    COLUMN_TYPE,
                    IS_NULLABLE,
                    COLUMN_DEFAULT,
                    COLUMN_KEY,
                    EXTRA
                 FROM information_schema.COLUMNS
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
                 ORDER BY ORDINAL_POSITION",
                &[self.schema_param(), Value::String(table.to_string())],
            )
            .await?;

        let columns = result
            .rows
            .iter()
            .map(|row| {
                let name = row
                    .get(0)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                // information_schema positions are 1-based
                let ordinal = row.get(1).and_then(|v| v.as_i64()).unwrap_or(1).max(1) as usize - 1;
                let data_type = row
                    .get(2)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let nullable = row.get(3).and_then(|v| v.as_str()).unwrap_or("NO") == "YES";
                let default_value = row
                    .get(4)
                    .filter(|v| !v.is_null())
                    .map(|v| v.to_string());
                let column_key = row.get(5).and_then(|v| v.as_str()).unwrap_or("");
                let extra = row.get(6).and_then(|v| v.as_str()).unwrap_or("");

                ColumnInfo {
                    name,
                    ordinal,
                    data_type,
                    nullable,
                    default_value,
                    is_primary_key: column_key == "PRI",
                    is_auto_increment: extra.contains("auto_increment"),
                }
            })
            .collect();

        Ok(columns)
    }

    #[tracing::instrument(skip(self))]
    async fn get_primary_key(&self, table: &str) -> Result<Option<PrimaryKeyInfo>> {
        let result = self
            .query(
                "SELECT COLUMN_NAME
                 FROM information_schema.KEY_COLUMN_USAGE
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
                 ORDER BY ORDINAL_POSITION",
                &[self.schema_param(), Value::String(table.to_string())],
            )
            .await?;

        let columns: Vec<String> = result
            .rows
            .iter()
            .filter_map(|row| row.get(0).and_then(|v| v.as_str()).map(str::to_string))
            .collect();

        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(PrimaryKeyInfo {
            name: Some("PRIMARY".to_string()),
            columns,
        }))
    }
}
