//! SQLite connection implementation

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, InterruptHandle, OpenFlags, params_from_iter};
use sqlgrid_core::{
    ColumnInfo, ColumnMeta, Connection, PrimaryKeyInfo, QueryResult, Result, Row,
    SchemaIntrospection, SqlDialect, SqlgridError, StatementResult, TableInfo, Transaction, Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The rusqlite handle plus the interrupt handle taken from it before it went
/// behind the mutex.
struct Session {
    conn: Mutex<RusqliteConnection>,
    interrupt: InterruptHandle,
}

impl Session {
    /// Run `work` on the blocking pool.
    ///
    /// Dropping the returned future while the statement is still running (an
    /// elapsed `tokio::time::timeout`, for one) interrupts it; the statement
    /// then fails with SQLITE_INTERRUPT and releases the session.
    async fn run<T, F>(self: &Arc<Self>, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RusqliteConnection) -> Result<T> + Send + 'static,
    {
        let session = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || {
            let conn = session.conn.lock();
            work(&conn)
        });

        let mut pending = InterruptOnDrop(Some(Arc::clone(self)));
        let joined = task.await;
        pending.0 = None;

        joined.map_err(|e| SqlgridError::Driver(format!("SQLite worker failed: {}", e)))?
    }
}

/// Interrupts the session when a call is abandoned before its result arrived.
///
/// A call still queued on the mutex is not affected; it runs to completion
/// with nobody waiting for it.
struct InterruptOnDrop(Option<Arc<Session>>);

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            tracing::debug!("interrupting abandoned SQLite statement");
            session.interrupt.interrupt();
        }
    }
}

/// SQLite connection wrapper
///
/// All statements, including those issued through a [`SqliteTransaction`],
/// run on the one `rusqlite::Connection` behind the mutex, off the async
/// threads.
pub struct SqliteConnection {
    session: Arc<Session>,
    closed: AtomicBool,
}

impl SqliteConnection {
    /// Open a SQLite database (`:memory:` for an in-memory database)
    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                SqlgridError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            let expanded_path = Self::expand_path(path)?;
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        return Err(SqlgridError::Connection(format!(
                            "Parent directory does not exist: {}",
                            parent.display()
                        )));
                    }
                }
            }

            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;

            let conn = RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                SqlgridError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?;

            conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| {
                SqlgridError::Connection(format!("Failed to set journal mode: {}", e))
            })?;
            conn
        };

        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| {
            SqlgridError::Connection(format!("Failed to enable foreign keys: {}", e))
        })?;

        // Taken before the connection goes behind the mutex; usable from any thread
        let interrupt = conn.get_interrupt_handle();

        tracing::info!(path = %path, "SQLite database connection established");
        Ok(Self {
            session: Arc::new(Session {
                conn: Mutex::new(conn),
                interrupt,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Expand `~/` and make relative paths absolute
    fn expand_path(path: &str) -> Result<String> {
        if path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            let home = dirs::home_dir().ok_or_else(|| {
                SqlgridError::Configuration("Unable to determine HOME directory".into())
            })?;
            home.join(rest).to_string_lossy().to_string()
        } else if path.starts_with('~') {
            return Err(SqlgridError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        if path_buf.is_relative() {
            Ok(std::env::current_dir()?
                .join(path_buf)
                .to_string_lossy()
                .to_string())
        } else {
            Ok(expanded)
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SqlgridError::Connection("SQLite connection is closed".into()));
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\""));
        let result = self.query(&sql, &[]).await?;
        result
            .scalar()
            .and_then(Value::as_i64)
            .ok_or_else(|| SqlgridError::Query("Row count is not an integer".into()))
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);
        self.session
            .run(move |conn| run_execute(conn, &sql, &params))
            .await
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);
        self.session
            .run(move |conn| run_query(conn, &sql, &params))
            .await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        tracing::debug!("beginning SQLite transaction");
        self.session
            .run(|conn| {
                conn.execute_batch("BEGIN DEFERRED").map_err(|e| {
                    SqlgridError::Query(format!("Failed to begin transaction: {}", e))
                })
            })
            .await?;
        Ok(Box::new(SqliteTransaction {
            session: Arc::clone(&self.session),
            committed: false,
            rolled_back: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing SQLite connection");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        Some(self)
    }
}

#[async_trait]
impl SchemaIntrospection for SqliteConnection {
    #[tracing::instrument(skip(self))]
    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let result = self
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;

        let mut tables = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let Some(name) = row.get(0).and_then(Value::as_str) else {
                continue;
            };
            let row_count = self.count_rows(name).await.ok();
            tables.push(TableInfo {
                name: name.to_string(),
                row_count,
            });
        }

        tracing::debug!(table_count = tables.len(), "tables listed");
        Ok(tables)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let result = self
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[Value::String(table.to_string())],
            )
            .await?;
        Ok(result.scalar().and_then(Value::as_i64).unwrap_or(0) > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let result = self
            .query(
                "SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
                &[Value::String(table.to_string())],
            )
            .await?;

        let mut columns: Vec<ColumnInfo> = result
            .rows
            .iter()
            .map(|row| {
                let ordinal = row.get(0).and_then(Value::as_i64).unwrap_or(0) as usize;
                let name = row.get(1).and_then(Value::as_str).unwrap_or("").to_string();
                let data_type = row.get(2).and_then(Value::as_str).unwrap_or("").to_string();
                let nullable = row.get(3).and_then(Value::as_i64).unwrap_or(0) == 0;
                let default_value = row
                    .get(4)
                    .filter(|v| !v.is_null())
                    .map(|v| v.to_string());
                let is_primary_key = row.get(5).and_then(Value::as_i64).unwrap_or(0) > 0;

                ColumnInfo {
                    name,
                    ordinal,
                    data_type,
                    nullable,
                    default_value,
                    is_primary_key,
                    is_auto_increment: false,
                }
            })
            .collect();

        // Only a lone INTEGER PRIMARY KEY aliases the rowid.
        let pk_count = columns.iter().filter(|c| c.is_primary_key).count();
        if pk_count == 1 {
            for column in columns.iter_mut().filter(|c| c.is_primary_key) {
                column.is_auto_increment = column.data_type.eq_ignore_ascii_case("INTEGER");
            }
        }

        tracing::trace!(table = %table, column_count = columns.len(), "columns fetched");
        Ok(columns)
    }

    async fn get_primary_key(&self, table: &str) -> Result<Option<PrimaryKeyInfo>> {
        let result = self
            .query(
                "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
                &[Value::String(table.to_string())],
            )
            .await?;

        let columns: Vec<String> = result
            .rows
            .iter()
            .filter_map(|row| row.get(0).and_then(Value::as_str).map(str::to_string))
            .collect();

        if columns.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PrimaryKeyInfo {
                name: None,
                columns,
            }))
        }
    }
}

/// SQLite transaction wrapper.
///
/// Issues raw `BEGIN DEFERRED` / `COMMIT` / `ROLLBACK` SQL so that it can share
/// the session with its connection without running into rusqlite's
/// borrow-based transaction lifetime requirements.
pub struct SqliteTransaction {
    session: Arc<Session>,
    committed: bool,
    rolled_back: bool,
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.rolled_back {
            tracing::warn!(
                "SQLite transaction dropped without commit or rollback, issuing automatic rollback"
            );
            let conn = self.session.conn.lock();
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("committing SQLite transaction");
        if self.rolled_back {
            return Err(SqlgridError::Query("Transaction already rolled back".into()));
        }
        if self.committed {
            return Err(SqlgridError::Query("Transaction already committed".into()));
        }

        // A failed COMMIT leaves the transaction open; Drop rolls it back.
        self.session
            .run(|conn| {
                conn.execute_batch("COMMIT").map_err(|e| {
                    SqlgridError::Query(format!("Failed to commit transaction: {}", e))
                })
            })
            .await?;
        self.committed = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("rolling back SQLite transaction");
        if self.committed {
            return Err(SqlgridError::Query("Transaction already committed".into()));
        }
        if self.rolled_back {
            return Ok(());
        }

        // Marked first so Drop does not issue a second ROLLBACK.
        self.rolled_back = true;
        self.session
            .run(|conn| {
                conn.execute_batch("ROLLBACK").map_err(|e| {
                    SqlgridError::Query(format!("Failed to rollback transaction: {}", e))
                })
            })
            .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing query in SQLite transaction");
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);
        self.session
            .run(move |conn| run_query(conn, &sql, &params))
            .await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing statement in SQLite transaction");
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);
        self.session
            .run(move |conn| run_execute(conn, &sql, &params))
            .await
    }
}

fn run_execute(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[rusqlite::types::Value],
) -> Result<StatementResult> {
    let rows_affected = conn
        .execute(sql, params_from_iter(params.iter()))
        .map_err(|e| SqlgridError::Query(format!("Failed to execute statement: {}", e)))?;

    let is_insert = sql
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("INSERT"));
    let last_insert_id = (is_insert && rows_affected > 0).then(|| conn.last_insert_rowid());

    tracing::debug!(affected_rows = rows_affected, "statement executed");
    Ok(StatementResult {
        affected_rows: rows_affected as u64,
        last_insert_id,
    })
}

fn run_query(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[rusqlite::types::Value],
) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| SqlgridError::Query(format!("Failed to prepare query: {}", e)))?;

    let mut column_names: Vec<String> = Vec::with_capacity(stmt.column_count());
    let mut columns: Vec<ColumnMeta> = Vec::with_capacity(stmt.column_count());
    for (idx, col) in stmt.columns().iter().enumerate() {
        let name = col.name().to_string();
        // sqlite3_column_decltype: the type from CREATE TABLE, if any
        let data_type = col.decl_type().unwrap_or("DYNAMIC").to_string();
        column_names.push(name.clone());
        columns.push(ColumnMeta {
            name,
            data_type,
            nullable: true,
            ordinal: idx,
        });
    }

    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(|e| SqlgridError::Query(format!("Failed to execute query: {}", e)))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| SqlgridError::Query(format!("Failed to fetch row: {}", e)))?
    {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(rusqlite_to_value(row, i)?);
        }
        rows.push(Row::new(column_names.clone(), values));
    }

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        execution_time_ms = execution_time_ms,
        "query executed successfully"
    );
    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms,
    })
}

/// Convert our Value types to rusqlite-compatible types
fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(if *b { 1 } else { 0 }),
        Value::Int64(i) => Sql::Integer(*i),
        Value::Float64(f) => Sql::Real(*f),
        Value::Decimal(d) => Sql::Text(d.clone()),
        Value::String(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
        Value::Date(d) => Sql::Text(d.to_string()),
        Value::Time(t) => Sql::Text(t.to_string()),
        Value::DateTime(dt) => Sql::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| SqlgridError::Query(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        // SQLite BLOBs might actually contain text stored without a declared type
        ValueRef::Blob(b) => match std::str::from_utf8(b) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(b.to_vec()),
        },
    };

    Ok(value)
}
