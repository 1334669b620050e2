//! In-memory mirror of the selected table
//!
//! [`GridModel`] never talks to the store. The coordinator replaces it
//! wholesale after a refresh and patches it after a confirmed mutation; every
//! change bumps [`GridModel::version`].

use sqlgrid_core::{Identifier, Value};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::schema::{Column, TableSchema};
use crate::{SyncError, SyncResult};

/// Primary key of one row: `(column, value)` pairs in key order
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey(Vec<(String, Value)>);

impl RowKey {
    /// Build a key; every component must be non-NULL
    pub fn new(parts: Vec<(String, Value)>) -> SyncResult<Self> {
        if parts.is_empty() {
            return Err(SyncError::Validation("row key has no columns".into()));
        }
        if let Some((column, _)) = parts.iter().find(|(_, v)| v.is_null()) {
            return Err(SyncError::Validation(format!(
                "row key column '{}' is NULL",
                column
            )));
        }
        Ok(Self(parts))
    }

    /// Single-column key
    pub fn single(column: impl Into<String>, value: impl Into<Value>) -> SyncResult<Self> {
        Self::new(vec![(column.into(), value.into())])
    }

    pub fn parts(&self) -> &[(String, Value)] {
        &self.0
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.iter().map(|(_, v)| v)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Extract the key of a row laid out in `schema` order.
    ///
    /// `None` for keyless tables and for rows with a NULL key component.
    pub fn from_row(schema: &TableSchema, values: &[Value]) -> Option<Self> {
        if !schema.has_primary_key() {
            return None;
        }
        let mut parts = Vec::with_capacity(schema.primary_key.len());
        for key_column in &schema.primary_key {
            let idx = schema.column_index(key_column.as_str())?;
            let value = values.get(idx)?;
            if value.is_null() {
                return None;
            }
            parts.push((key_column.to_string(), value.clone()));
        }
        Some(Self(parts))
    }

    /// Whether this key addresses `schema`'s primary key, column for column
    pub fn matches(&self, schema: &TableSchema) -> bool {
        self.0.len() == schema.primary_key.len()
            && schema
                .primary_key
                .iter()
                .all(|k| self.get(k.as_str()).is_some())
    }
}

// Values hold floats, so equality is PartialEq; keys never contain NULL and
// NaN keys are not produced by any supported store.
impl Eq for RowKey {}

impl Hash for RowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (column, value) in &self.0 {
            column.hash(state);
            value.kind().hash(state);
            match value {
                // -0.0 == 0.0 must hash alike
                Value::Float64(f) => (f + 0.0).to_bits().hash(state),
                other => other.to_string().hash(state),
            }
        }
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(c, v)| format!("{}={}", c, v)).collect();
        f.write_str(&parts.join(", "))
    }
}

/// One displayed row
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    /// `None` when the row cannot be targeted
    pub key: Option<RowKey>,
    pub values: Vec<Value>,
}

impl GridRow {
    pub fn from_values(schema: &TableSchema, values: Vec<Value>) -> Self {
        Self {
            key: RowKey::from_row(schema, &values),
            values,
        }
    }
}

/// Owned copy of the grid handed to the rendering side
#[derive(Debug, Clone, PartialEq)]
pub struct GridSnapshot {
    pub table: Option<String>,
    pub columns: Vec<Column>,
    pub rows: Vec<GridRow>,
    pub version: u64,
}

#[derive(Debug, Default)]
pub struct GridModel {
    schema: Option<TableSchema>,
    rows: Vec<GridRow>,
    index: HashMap<RowKey, usize>,
    version: u64,
}

impl GridModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> Option<&TableSchema> {
        self.schema.as_ref()
    }

    pub fn table(&self) -> Option<&Identifier> {
        self.schema.as_ref().map(|s| &s.table)
    }

    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn row(&self, key: &RowKey) -> Option<&GridRow> {
        self.index.get(key).map(|&idx| &self.rows[idx])
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.as_ref()?.column_index(name)
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            table: self.table().map(ToString::to_string),
            columns: self
                .schema
                .as_ref()
                .map(|s| s.columns.clone())
                .unwrap_or_default(),
            rows: self.rows.clone(),
            version: self.version,
        }
    }

    /// Swap in a new schema and row set atomically
    pub fn replace(&mut self, schema: TableSchema, rows: Vec<GridRow>) -> SyncResult<()> {
        let width = schema.columns.len();
        if let Some(bad) = rows.iter().find(|r| r.values.len() != width) {
            return Err(SyncError::Validation(format!(
                "row has {} cells but '{}' has {} columns",
                bad.values.len(),
                schema.table,
                width
            )));
        }

        self.schema = Some(schema);
        self.rows = rows;
        self.reindex();
        self.bump();
        Ok(())
    }

    /// Forget the selected table
    pub fn clear(&mut self) {
        self.schema = None;
        self.rows.clear();
        self.index.clear();
        self.bump();
    }

    pub fn patch_cell(&mut self, key: &RowKey, column: &str, value: Value) -> SyncResult<()> {
        let col_idx = self
            .column_index(column)
            .ok_or_else(|| SyncError::StaleReference(format!("column '{}' not in grid", column)))?;
        let row_idx = self.row_index(key)?;

        self.rows[row_idx].values[col_idx] = value;

        let rekey = self
            .schema
            .as_ref()
            .is_some_and(|s| s.is_primary_key(column));
        if rekey {
            if let Some(schema) = &self.schema {
                let row = &mut self.rows[row_idx];
                row.key = RowKey::from_row(schema, &row.values);
            }
            self.reindex();
        }
        self.bump();
        Ok(())
    }

    pub fn remove_row(&mut self, key: &RowKey) -> SyncResult<GridRow> {
        let row_idx = self.row_index(key)?;
        let row = self.rows.remove(row_idx);
        self.reindex();
        self.bump();
        Ok(row)
    }

    pub fn insert_row(&mut self, row: GridRow) -> SyncResult<()> {
        let width = self
            .schema
            .as_ref()
            .map(|s| s.columns.len())
            .ok_or(SyncError::NoTableSelected)?;
        if row.values.len() != width {
            return Err(SyncError::StaleReference(format!(
                "row has {} cells, grid has {} columns",
                row.values.len(),
                width
            )));
        }
        if let Some(key) = &row.key {
            if self.index.contains_key(key) {
                return Err(SyncError::StaleReference(format!(
                    "row {} is already in the grid",
                    key
                )));
            }
            self.index.insert(key.clone(), self.rows.len());
        }
        self.rows.push(row);
        self.bump();
        Ok(())
    }

    /// Append a column, filling existing rows with `fill`
    pub fn insert_column(&mut self, column: Column, fill: Value) -> SyncResult<()> {
        let schema = self.schema.as_mut().ok_or(SyncError::NoTableSelected)?;
        if schema.column(column.name.as_str()).is_some() {
            return Err(SyncError::StaleReference(format!(
                "column '{}' is already in the grid",
                column.name
            )));
        }
        schema.columns.push(column);
        for row in &mut self.rows {
            row.values.push(fill.clone());
        }
        self.bump();
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> SyncResult<Column> {
        let schema = self.schema.as_mut().ok_or(SyncError::NoTableSelected)?;
        let idx = schema
            .column_index(name)
            .ok_or_else(|| SyncError::StaleReference(format!("column '{}' not in grid", name)))?;
        if schema.is_primary_key(name) {
            return Err(SyncError::Validation(format!(
                "column '{}' is part of the primary key",
                name
            )));
        }
        let column = schema.columns.remove(idx);
        for row in &mut self.rows {
            row.values.remove(idx);
        }
        self.bump();
        Ok(column)
    }

    /// Follow a rename of the selected table
    pub fn rename_table(&mut self, new_name: Identifier) -> SyncResult<()> {
        let schema = self.schema.as_mut().ok_or(SyncError::NoTableSelected)?;
        schema.table = new_name;
        self.bump();
        Ok(())
    }

    fn row_index(&self, key: &RowKey) -> SyncResult<usize> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| SyncError::StaleReference(format!("row {} not in grid", key)))
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (idx, row) in self.rows.iter().enumerate() {
            if let Some(key) = &row.key {
                if self.index.insert(key.clone(), idx).is_some() {
                    tracing::warn!(key = %key, "duplicate row key in grid");
                }
            }
        }
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::{column, orders_schema};
    use pretty_assertions::assert_eq;

    fn key(id: i64) -> RowKey {
        RowKey::single("id", id).unwrap()
    }

    fn orders_grid() -> GridModel {
        let schema = orders_schema();
        let rows = vec![
            GridRow::from_values(&schema, vec![Value::Int64(1), "open".into()]),
            GridRow::from_values(&schema, vec![Value::Int64(2), "paid".into()]),
        ];
        let mut grid = GridModel::new();
        grid.replace(schema, rows).unwrap();
        grid
    }

    #[test]
    fn keys_hash_by_value() {
        let mut map = HashMap::new();
        map.insert(key(1), "a");
        assert_eq!(map.get(&key(1)), Some(&"a"));
        assert_eq!(map.get(&RowKey::single("id", "1").unwrap()), None);
    }

    #[test]
    fn null_key_components_are_rejected() {
        assert!(RowKey::single("id", Value::Null).is_err());
        let schema = orders_schema();
        let row = GridRow::from_values(&schema, vec![Value::Null, "open".into()]);
        assert_eq!(row.key, None);
    }

    #[test]
    fn patch_cell_updates_one_cell() {
        let mut grid = orders_grid();
        let before = grid.version();
        grid.patch_cell(&key(1), "status", "closed".into()).unwrap();
        assert_eq!(grid.row(&key(1)).unwrap().values[1], Value::from("closed"));
        assert_eq!(grid.row(&key(2)).unwrap().values[1], Value::from("paid"));
        assert!(grid.version() > before);
    }

    #[test]
    fn patch_cell_on_missing_targets_is_stale() {
        let mut grid = orders_grid();
        assert!(matches!(
            grid.patch_cell(&key(9), "status", "x".into()),
            Err(SyncError::StaleReference(_))
        ));
        assert!(matches!(
            grid.patch_cell(&key(1), "nope", "x".into()),
            Err(SyncError::StaleReference(_))
        ));
    }

    #[test]
    fn patching_a_key_column_rekeys_the_row() {
        let mut grid = orders_grid();
        grid.patch_cell(&key(1), "id", Value::Int64(10)).unwrap();
        assert!(grid.row(&key(1)).is_none());
        assert_eq!(grid.row(&key(10)).unwrap().values[1], Value::from("open"));
    }

    #[test]
    fn remove_row_reindexes() {
        let mut grid = orders_grid();
        let removed = grid.remove_row(&key(1)).unwrap();
        assert_eq!(removed.values[0], Value::Int64(1));
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.row(&key(2)).unwrap().values[1], Value::from("paid"));
        assert!(grid.remove_row(&key(1)).is_err());
    }

    #[test]
    fn insert_row_rejects_duplicates_and_bad_width() {
        let mut grid = orders_grid();
        let schema = orders_schema();
        let dup = GridRow::from_values(&schema, vec![Value::Int64(2), "x".into()]);
        assert!(grid.insert_row(dup).is_err());
        let narrow = GridRow {
            key: None,
            values: vec![Value::Int64(3)],
        };
        assert!(grid.insert_row(narrow).is_err());
        let ok = GridRow::from_values(&schema, vec![Value::Int64(3), "new".into()]);
        grid.insert_row(ok).unwrap();
        assert_eq!(grid.len(), 3);
        assert!(grid.row(&key(3)).is_some());
    }

    #[test]
    fn column_changes_keep_rows_aligned() {
        let mut grid = orders_grid();
        grid.insert_column(column("score", "INT"), Value::Int64(0))
            .unwrap();
        assert_eq!(grid.column_index("score"), Some(2));
        assert!(grid.rows().iter().all(|r| r.values[2] == Value::Int64(0)));

        grid.remove_column("status").unwrap();
        let snapshot = grid.snapshot();
        assert_eq!(snapshot.columns.len(), 2);
        assert!(snapshot.rows.iter().all(|r| r.values.len() == 2));
        assert!(matches!(
            grid.remove_column("id"),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn replace_rejects_misaligned_rows() {
        let mut grid = GridModel::new();
        let rows = vec![GridRow {
            key: None,
            values: vec![Value::Int64(1)],
        }];
        assert!(grid.replace(orders_schema(), rows).is_err());
        assert!(grid.schema().is_none());
        assert_eq!(grid.version(), 0);
    }

    #[test]
    fn clear_forgets_the_table() {
        let mut grid = orders_grid();
        grid.clear();
        let snapshot = grid.snapshot();
        assert_eq!(snapshot.table, None);
        assert!(snapshot.columns.is_empty());
        assert!(snapshot.rows.is_empty());
    }
}
